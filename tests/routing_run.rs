use cdr_router::classify::NamingScheme;
use cdr_router::execution::{read_entries, ConflictPolicy, MergeScope};
use cdr_router::merge::MERGE_SEPARATOR;
use cdr_router::run::RunStamp;
use cdr_router::{Orchestrator, RouterConfig};
use chrono::{TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

const DOMAIN: &str = "ABC/gb/x/art/y/z/ces\nXYZ/us/x/voc/y/z/mms\nshort/line\n";

struct Workspace {
    _dir: TempDir,
    root: PathBuf,
}

impl Workspace {
    fn new(domain: &str) -> Self {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("txtFiles")).unwrap();
        fs::create_dir_all(root.join("destFolders")).unwrap();
        fs::create_dir_all(root.join("input")).unwrap();
        fs::write(root.join("input/domain_file.txt"), domain).unwrap();
        Self { _dir: dir, root }
    }

    fn config(&self) -> RouterConfig {
        RouterConfig::new(
            self.root.join("txtFiles"),
            self.root.join("destFolders"),
            self.root.join("input/domain_file.txt"),
            self.root.join("resource/processed_files_log.txt"),
        )
    }

    fn source(&self, name: &str, body: &str) {
        fs::write(self.root.join("txtFiles").join(name), body).unwrap();
    }

    fn dest(&self) -> PathBuf {
        self.root.join("destFolders")
    }

    fn audit(&self) -> Vec<String> {
        read_entries(&self.root.join("resource/processed_files_log.txt")).unwrap()
    }
}

fn stamp() -> RunStamp {
    RunStamp::at(&Utc.with_ymd_and_hms(2024, 5, 6, 16, 45, 0).unwrap())
}

fn files_under(path: &Path) -> usize {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

#[tokio::test]
async fn empty_source_is_a_no_op_every_time() {
    let ws = Workspace::new(DOMAIN);
    let orchestrator = Orchestrator::new(ws.config()).with_stamp(stamp());

    for _ in 0..2 {
        let summary = orchestrator.run().await.unwrap();
        assert_eq!(summary.discovered, 0);
        assert_eq!(summary.routed, 0);
        assert_eq!(summary.exceptioned, 0);
        assert!(summary.faults.is_empty());
    }

    assert_eq!(files_under(&ws.dest()), 0);
    assert!(ws.audit().is_empty());
}

#[tokio::test]
async fn routes_valid_names_and_excepts_the_rest() {
    let ws = Workspace::new(DOMAIN);
    ws.source("ABC_gb_0_art_0_0_ces_12.txt", "call record");
    ws.source("badname.txt", "junk");
    // Well formed, but "zz" is not in the domain
    ws.source("ABC_zz_0_art_0_0_ces_13.txt", "unknown carrier");

    let summary = Orchestrator::new(ws.config())
        .with_stamp(stamp())
        .run()
        .await
        .unwrap();

    let routed = ws.dest().join("ABC/GB/CES/ART/CDR/ABC_gb_0_art_0_0_ces_12.txt");
    assert_eq!(fs::read_to_string(routed).unwrap(), "call record");
    assert!(ws.dest().join("_Exception/badname.txt").exists());
    assert!(ws.dest().join("_Exception/ABC_zz_0_art_0_0_ces_13.txt").exists());

    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.routed, 1);
    assert_eq!(summary.exceptioned, 2);
    assert!(summary.is_balanced());
    assert_eq!(summary.census.valid_files, 1);
    assert_eq!(summary.census.exception_files, 2);
    assert_eq!(summary.census.remaining_sources, 0);

    assert_eq!(ws.audit(), vec!["ABC_gb_0_art_0_0_ces_12.txt"]);
    assert_eq!(summary.audit_entries, 1);
}

#[tokio::test]
async fn empty_domain_fails_every_file_closed() {
    let ws = Workspace::new("");
    ws.source("ABC_gb_0_art_0_0_ces_12.txt", "a");
    ws.source("XYZ_us_0_voc_0_0_mms_1.txt", "b");

    let summary = Orchestrator::new(ws.config())
        .with_stamp(stamp())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.exceptioned, 2);
    assert_eq!(summary.routed, 0);
    assert_eq!(files_under(&ws.dest().join("_Exception")), 2);
    assert!(ws.audit().is_empty());
}

#[tokio::test]
async fn positional_scheme_routes_four_field_names() {
    let ws = Workspace::new("ABC/gb/x/art\n");
    ws.source("ABC_gb_x_art.txt", "four fields");
    ws.source("ABC_gb_x.txt", "three fields");

    let config = ws.config().with_naming_scheme(NamingScheme::Positional);
    let summary = Orchestrator::new(config)
        .with_stamp(stamp())
        .run()
        .await
        .unwrap();

    assert!(ws.dest().join("ABC/GB/x/ART/CDR/ABC_gb_x_art.txt").exists());
    assert!(ws.dest().join("_Exception/ABC_gb_x.txt").exists());
    assert!(summary.is_balanced());
}

#[tokio::test]
async fn append_merge_leaves_one_artifact_per_destination() {
    let ws = Workspace::new(DOMAIN);
    ws.source("ABC_gb_0_art_0_0_ces_2.txt", "second");
    ws.source("ABC_gb_0_art_0_0_ces_1.txt", "first");

    let config = ws.config().with_conflict_policy(ConflictPolicy::AppendMerge);
    let summary = Orchestrator::new(config)
        .with_stamp(stamp())
        .run()
        .await
        .unwrap();

    let target = ws.dest().join("ABC/GB/CES/ART/CDR");
    assert_eq!(files_under(&target), 1);
    assert_eq!(
        fs::read_to_string(target.join("ABC_gb_0_art_0_0_ces_1.txt")).unwrap(),
        format!("first{}second", MERGE_SEPARATOR)
    );
    assert_eq!(summary.routed_sources, 2);
    assert_eq!(summary.merge_conflicts_resolved, 1);
    assert_eq!(ws.audit().len(), 2);
}

#[tokio::test]
async fn second_run_with_same_names_is_rejected_by_default() {
    let ws = Workspace::new(DOMAIN);
    let orchestrator = Orchestrator::new(ws.config()).with_stamp(stamp());

    ws.source("ABC_gb_0_art_0_0_ces_12.txt", "first batch");
    orchestrator.run().await.unwrap();
    ws.source("ABC_gb_0_art_0_0_ces_12.txt", "second batch");
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.census.remaining_sources, 1);
    assert_eq!(
        fs::read_to_string(ws.dest().join("ABC/GB/CES/ART/CDR/ABC_gb_0_art_0_0_ces_12.txt"))
            .unwrap(),
        "first batch"
    );
    assert_eq!(ws.audit().len(), 1);
}

#[tokio::test]
async fn merge_mode_consolidates_groups_into_archived_artifacts() {
    let ws = Workspace::new(DOMAIN);
    ws.source("ABC_gb_0_art_0_0_ces_1.txt", "one");
    ws.source("ABC_gb_0_art_0_0_ces_2.txt", "two");
    ws.source("ABC_gb_0_art_0_0_ces_3.txt", "three");
    ws.source("XYZ_us_0_voc_0_0_mms_9.txt", "solo");
    ws.source("badname.txt", "junk");

    let staging = ws.root.join("lab/metadata");
    let config = ws.config().with_merge(&staging, true);
    let summary = Orchestrator::new(config)
        .with_stamp(stamp())
        .run()
        .await
        .unwrap();

    let stamp = stamp();
    let grouped = ws
        .dest()
        .join("ABC/GB/CES/ART/CDR")
        .join(format!("ABC_GB_CES_ART_{}.txt", stamp));
    assert_eq!(
        fs::read_to_string(&grouped).unwrap(),
        format!("one{sep}two{sep}three", sep = MERGE_SEPARATOR)
    );
    assert_eq!(files_under(&ws.dest().join("ABC")), 1);
    assert!(ws
        .dest()
        .join("XYZ/US/MMS/VOC/CDR")
        .join(format!("XYZ_US_MMS_VOC_{}.txt", stamp))
        .exists());
    assert!(ws.dest().join("_Exception/badname.txt").exists());

    let staged = staging.join(stamp.as_str());
    assert!(staged.join("ABC_GB_CES_ART.tar").exists());
    assert!(staged.join("XYZ_US_MMS_VOC.tar").exists());

    assert_eq!(summary.merged_groups, 2);
    assert_eq!(summary.archives_written, 2);
    assert_eq!(summary.routed, 2);
    assert_eq!(summary.routed_sources, 4);
    assert_eq!(summary.exceptioned, 1);
    assert!(summary.is_balanced());
    assert_eq!(summary.census.remaining_sources, 0);
}

#[tokio::test]
async fn many_files_with_few_workers_account_for_everything() {
    let ws = Workspace::new(DOMAIN);
    for i in 0..60 {
        let name = match i % 3 {
            0 => format!("ABC_gb_0_art_0_0_ces_{}.txt", i),
            1 => format!("XYZ_us_0_voc_0_0_mms_{}.txt", i),
            _ => format!("broken_{}.txt", i),
        };
        ws.source(&name, &format!("body {}", i));
    }

    let summary = Orchestrator::new(ws.config().with_max_workers(3))
        .with_stamp(stamp())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.discovered, 60);
    assert_eq!(summary.routed, 40);
    assert_eq!(summary.exceptioned, 20);
    assert!(summary.is_balanced());
    assert_eq!(ws.audit().len(), 40);
    assert_eq!(summary.census.valid_files, 40);
}

#[tokio::test]
async fn same_key_append_merge_folds_artifacts_from_both_shifts() {
    let ws = Workspace::new(DOMAIN);
    let config = ws
        .config()
        .with_merge(ws.root.join("lab/metadata"), true)
        .with_conflict_policy(ConflictPolicy::AppendMerge)
        .with_merge_scope(MergeScope::SameKey);
    let morning = RunStamp::at(&Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap());
    let afternoon = RunStamp::at(&Utc.with_ymd_and_hms(2024, 5, 6, 16, 0, 0).unwrap());

    ws.source("ABC_gb_0_art_0_0_ces_1.txt", "one");
    Orchestrator::new(config.clone())
        .with_stamp(morning)
        .run()
        .await
        .unwrap();
    ws.source("ABC_gb_0_art_0_0_ces_2.txt", "two");
    let summary = Orchestrator::new(config)
        .with_stamp(afternoon)
        .run()
        .await
        .unwrap();

    let target = ws.dest().join("ABC/GB/CES/ART/CDR");
    assert_eq!(files_under(&target), 1);
    assert_eq!(
        fs::read_to_string(target.join("ABC_GB_CES_ART_240506071500.txt")).unwrap(),
        format!("one{}two", MERGE_SEPARATOR)
    );
    assert_eq!(summary.merge_conflicts_resolved, 1);
    assert!(summary.is_balanced());
}
