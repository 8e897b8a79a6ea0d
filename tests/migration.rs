use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use assert_matches::assert_matches;

use gen3_expansion::error::Gen3Error;
use gen3_expansion::migration::MigrationWorkspace;
use gen3_expansion::table::Dataset;

const PROJECT: &str = "DEV-test";

fn write(dir: &Path, node: &str, content: &str) {
    fs::write(dir.join(format!("temp_{PROJECT}_{node}.tsv")), content).unwrap();
}

fn workspace(dir: &Path) -> MigrationWorkspace {
    MigrationWorkspace::new(dir, "temp", PROJECT)
}

#[test]
fn merge_nodes_unions_headers_and_sets_type() {
    let temp = tempfile::tempdir().unwrap();
    write(
        temp.path(),
        "mri_exam",
        "type\tsubmitter_id\tvisits.submitter_id\tfield_strength\nmri_exam\tm1\tv1\t3T\n",
    );
    write(
        temp.path(),
        "ct_exam",
        "type\tsubmitter_id\tvisits.submitter_id\tcontrast\nct_exam\tc1\tv2\tyes\n",
    );
    let workspace = workspace(temp.path());
    let outcome = workspace
        .merge_nodes(
            &["mri_exam".to_string(), "ct_exam".to_string(), "pet_exam".to_string()],
            "imaging_exam",
        )
        .unwrap();

    assert_eq!(outcome.rows, 2);
    let merged = workspace.load("imaging_exam").unwrap();
    assert_eq!(
        merged.headers(),
        ["type", "submitter_id", "visits.submitter_id", "field_strength", "contrast"]
    );
    assert_eq!(merged.column("type").unwrap(), vec!["imaging_exam", "imaging_exam"]);
    assert_eq!(merged.value(1, "field_strength"), Some(""));
    assert_eq!(merged.value(1, "contrast"), Some("yes"));
}

#[test]
fn merge_nodes_without_inputs_fails() {
    let temp = tempfile::tempdir().unwrap();
    let result = workspace(temp.path()).merge_nodes(&["ghost".to_string()], "imaging_exam");
    assert_matches!(result, Err(Gen3Error::Filesystem(_)));
}

#[test]
fn add_missing_links_fills_only_empty_cells() {
    let temp = tempfile::tempdir().unwrap();
    write(
        temp.path(),
        "imaging_exam",
        "type\tsubmitter_id\tvisits.submitter_id\nimaging_exam\te1\tv1\nimaging_exam\te2\t\n",
    );
    let workspace = workspace(temp.path());
    let outcome = workspace.add_missing_links("imaging_exam", "visit").unwrap();

    assert_eq!(outcome.changed, 1);
    assert!(outcome.written);
    let table = workspace.load("imaging_exam").unwrap();
    assert_eq!(
        table.column("visits.submitter_id").unwrap(),
        vec!["v1", "e2_visit"]
    );

    let again = workspace.add_missing_links("imaging_exam", "visit").unwrap();
    assert_eq!(again.changed, 0);
    assert!(!again.written);
}

#[test]
fn add_missing_links_requires_link_column() {
    let temp = tempfile::tempdir().unwrap();
    write(temp.path(), "imaging_exam", "type\tsubmitter_id\nimaging_exam\te1\n");
    let result = workspace(temp.path()).add_missing_links("imaging_exam", "visit");
    assert_matches!(
        result,
        Err(Gen3Error::MissingColumn { column, .. }) if column == "visits.submitter_id"
    );
}

#[test]
fn create_missing_links_adds_absent_parents_once() {
    let temp = tempfile::tempdir().unwrap();
    write(
        temp.path(),
        "imaging_exam",
        "type\tsubmitter_id\tvisits.submitter_id\tcases.submitter_id\n\
imaging_exam\te1\tv1\tc1\n\
imaging_exam\te2\te2_visit\tc2\n\
imaging_exam\te3\te2_visit\tc2\n",
    );
    write(
        temp.path(),
        "visit",
        "type\tsubmitter_id\tcases.submitter_id\nvisit\tv1\tc1\n",
    );
    let workspace = workspace(temp.path());
    let properties = BTreeMap::from([("visit_label".to_string(), "imaging".to_string())]);
    let outcome = workspace
        .create_missing_links("imaging_exam", "visit", "case", &properties)
        .unwrap();

    assert_eq!(outcome.changed, 1);
    let visits = workspace.load("visit").unwrap();
    assert_eq!(visits.len(), 2);
    assert_eq!(visits.value(1, "submitter_id"), Some("e2_visit"));
    assert_eq!(visits.value(1, "cases.submitter_id"), Some("c2"));
    assert_eq!(visits.value(1, "visit_label"), Some("imaging"));
    assert_eq!(visits.value(0, "visit_label"), Some(""));
}

#[test]
fn move_properties_creates_child_records() {
    let temp = tempfile::tempdir().unwrap();
    write(
        temp.path(),
        "case",
        "type\tsubmitter_id\tprojects.submitter_id\tbmi\tweight\n\
case\tc1\tp1\t22.5\t70\n\
case\tc2\tp1\t\t\n",
    );
    let workspace = workspace(temp.path());
    let properties = vec!["bmi".to_string(), "weight".to_string()];
    let outcome = workspace
        .move_properties("case", "exposure", &properties, "project")
        .unwrap();

    assert_eq!(outcome.changed, 2);
    let exposures = workspace.load("exposure").unwrap();
    assert_eq!(
        exposures.column("submitter_id").unwrap(),
        vec!["c1_exposure", "c2_exposure"]
    );
    assert_eq!(exposures.value(0, "projects.submitter_id"), Some("p1"));
    assert_eq!(exposures.value(0, "bmi"), Some("22.5"));
    assert_eq!(exposures.value(0, "project_id"), Some(PROJECT));

    let again = workspace
        .move_properties("case", "exposure", &properties, "project")
        .unwrap();
    assert_eq!(again.changed, 0);
    assert_eq!(workspace.load("exposure").unwrap().len(), 2);
}

#[test]
fn move_properties_refuses_unlinked_rows() {
    let temp = tempfile::tempdir().unwrap();
    write(
        temp.path(),
        "case",
        "type\tsubmitter_id\tprojects.submitter_id\tbmi\ncase\tc1\t\t22.5\n",
    );
    let workspace = workspace(temp.path());
    let outcome = workspace
        .move_properties("case", "exposure", &["bmi".to_string()], "project")
        .unwrap();
    assert!(!outcome.written);
    assert!(!temp.path().join(format!("temp_{PROJECT}_exposure.tsv")).exists());
}

#[test]
fn rename_and_drop_properties() {
    let temp = tempfile::tempdir().unwrap();
    write(
        temp.path(),
        "demographic",
        "type\tsubmitter_id\tgender\tage\ndemographic\td1\tF\t40\n",
    );
    let workspace = workspace(temp.path());
    let renames = BTreeMap::from([("gender".to_string(), "sex".to_string())]);
    assert_eq!(
        workspace
            .change_property_names("demographic", &renames)
            .unwrap()
            .changed,
        1
    );
    let dropped = workspace
        .drop_properties("demographic", &["age".to_string(), "missing".to_string()])
        .unwrap();
    assert_eq!(dropped.changed, 1);

    let table = workspace.load("demographic").unwrap();
    assert_eq!(table.headers(), ["type", "submitter_id", "sex"]);
    assert_eq!(table.value(0, "sex"), Some("F"));
}

#[test]
fn drop_links_removes_plain_and_numbered_pairs() {
    let temp = tempfile::tempdir().unwrap();
    write(
        temp.path(),
        "demographic",
        "type\tsubmitter_id\tcases.submitter_id\tcases.id\tvisits.submitter_id#1\tvisits.id#1\tvisits.submitter_id#2\tvisits.id#2\n\
demographic\td1\tc1\tu1\tv1\tu2\tv2\tu3\n",
    );
    let workspace = workspace(temp.path());
    let outcome = workspace
        .drop_links("demographic", &["cases".to_string(), "visits".to_string()])
        .unwrap();

    assert_eq!(outcome.changed, 6);
    let table = workspace.load("demographic").unwrap();
    assert_eq!(table.headers(), ["type", "submitter_id"]);
}

#[test]
fn merge_links_takes_first_non_empty_sublink() {
    let temp = tempfile::tempdir().unwrap();
    write(
        temp.path(),
        "imaging_file",
        "type\tsubmitter_id\timaging_exams.submitter_id\timaging_mri_exams.submitter_id\timaging_ct_exams.submitter_id\n\
imaging_file\tf1\tstale\tm1\t\n\
imaging_file\tf2\tstale\t\tct1\n\
imaging_file\tf3\tstale\t\t\n",
    );
    let workspace = workspace(temp.path());
    let outcome = workspace
        .merge_links(
            "imaging_file",
            "imaging_exams",
            &["imaging_mri_exams".to_string(), "imaging_ct_exams".to_string()],
        )
        .unwrap();

    assert_eq!(outcome.changed, 2);
    let table = workspace.load("imaging_file").unwrap();
    assert_eq!(
        table.column("imaging_exams.submitter_id").unwrap(),
        vec!["m1", "ct1", ""]
    );
}

#[test]
fn make_temp_files_copies_matching_files() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(temp.path().join("DEV-test_case.tsv"), "type\tsubmitter_id\n").unwrap();
    fs::write(temp.path().join("DEV-test_visit.tsv"), "type\tsubmitter_id\n").unwrap();
    fs::write(temp.path().join("DEV-test_notes.txt"), "notes").unwrap();

    let copies =
        MigrationWorkspace::make_temp_files(temp.path(), "DEV-test", ".tsv", "temp").unwrap();
    assert_eq!(copies.len(), 2);
    assert!(temp.path().join("temp_DEV-test_case.tsv").exists());
    assert!(temp.path().join("temp_DEV-test_visit.tsv").exists());

    let copied = Dataset::load(&temp.path().join("temp_DEV-test_case.tsv")).unwrap();
    assert_eq!(copied.headers(), ["type", "submitter_id"]);
}
