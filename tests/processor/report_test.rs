//! Result-file matching and video attachment.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use reelkeeper::report::{AttachOutcome, MatchRule, ReportDirectory};

fn write_result(dir: &Path, uuid: &str, doc: &Value) -> PathBuf {
    let path = dir.join(format!("{uuid}-result.json"));
    std::fs::write(&path, doc.to_string()).expect("write result");
    path
}

fn read(path: &Path) -> Value {
    let contents = std::fs::read_to_string(path).expect("read result");
    serde_json::from_str(&contents).expect("parse result")
}

#[test]
fn full_name_match_wins_over_short_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    // Sorted first, but only a short-name match.
    write_result(
        dir.path(),
        "a",
        &json!({"name": "test_login", "fullName": "tests.other.py.test_login_admin"}),
    );
    let exact = write_result(
        dir.path(),
        "b",
        &json!({"name": "test_login", "fullName": "tests.test_auth.py.test_login"}),
    );
    let reports = ReportDirectory::new(dir.path());

    let found = reports.find_result("tests/test_auth.py::test_login");
    assert_eq!(found, Some((exact, MatchRule::FullName)));
}

#[test]
fn short_name_is_the_fallback() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_result(
        dir.path(),
        "a",
        &json!({"name": "test_checkout", "fullName": "suite.Checkout#test_checkout"}),
    );
    let reports = ReportDirectory::new(dir.path());

    let found = reports.find_result("tests/test_shop.py::test_checkout[chrome]");
    assert_eq!(found, Some((path, MatchRule::ShortName)));
}

#[test]
fn empty_names_never_match() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_result(dir.path(), "a", &json!({"name": "", "fullName": ""}));
    write_result(dir.path(), "b", &json!({"status": "passed"}));
    let reports = ReportDirectory::new(dir.path());

    assert!(reports.find_result("tests/test_x.py::test_y").is_none());
}

#[test]
fn attach_targets_last_after_fixture() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_result(
        dir.path(),
        "a",
        &json!({
            "name": "test_cart",
            "fullName": "tests.test_cart.py.test_cart",
            "afters": [{"name": "db"}, {"name": "driver::0", "attachments": []}]
        }),
    );
    let reports = ReportDirectory::new(dir.path());

    let outcome = reports
        .attach_video("tests/test_cart.py::test_cart", "test_cart.mp4")
        .expect("attach");
    assert_eq!(outcome, AttachOutcome::Attached(path.clone()));

    let doc = read(&path);
    assert_eq!(doc["afters"][1]["attachments"][0]["source"], "test_cart.mp4");
    assert!(doc["afters"][0].get("attachments").is_none());
    assert!(doc.get("attachments").is_none());
}

#[test]
fn attach_without_afters_targets_result_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_result(
        dir.path(),
        "a",
        &json!({
            "name": "test_cart",
            "fullName": "tests.test_cart.py.test_cart",
            "attachments": [{"name": "log", "source": "log.txt", "type": "text/plain"}]
        }),
    );
    let reports = ReportDirectory::new(dir.path());

    reports
        .attach_video("tests/test_cart.py::test_cart", "test_cart.mp4")
        .expect("attach");

    let doc = read(&path);
    let list = doc["attachments"].as_array().expect("attachments array");
    assert_eq!(list.len(), 2);
    assert_eq!(list[1]["name"], "Test Video");
    assert_eq!(list[1]["type"], "video/mp4");
}

#[test]
fn reattaching_same_video_is_a_no_op() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_result(
        dir.path(),
        "a",
        &json!({"name": "test_cart", "fullName": "tests.test_cart.py.test_cart"}),
    );
    let reports = ReportDirectory::new(dir.path());

    reports
        .attach_video("tests/test_cart.py::test_cart", "test_cart.mp4")
        .expect("first attach");
    let second = reports
        .attach_video("tests/test_cart.py::test_cart", "test_cart.mp4")
        .expect("second attach");

    assert_eq!(second, AttachOutcome::AlreadyAttached(path.clone()));
    assert_eq!(read(&path)["attachments"].as_array().map(Vec::len), Some(1));
}

#[test]
fn unmatched_test_reports_no_match() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_result(
        dir.path(),
        "a",
        &json!({"name": "test_cart", "fullName": "tests.test_cart.py.test_cart"}),
    );
    let before = std::fs::read_to_string(&path).expect("read");
    let reports = ReportDirectory::new(dir.path());

    let outcome = reports
        .attach_video("tests/test_search.py::test_search", "test_search.mp4")
        .expect("attach");

    assert_eq!(outcome, AttachOutcome::NoMatch);
    assert_eq!(std::fs::read_to_string(&path).expect("read"), before);
}

#[test]
fn unparsable_and_unrelated_files_are_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("0-result.json"), "{ truncated").expect("write");
    std::fs::write(
        dir.path().join("notes.json"),
        json!({"name": "test_cart"}).to_string(),
    )
    .expect("write");
    let path = write_result(
        dir.path(),
        "b",
        &json!({"name": "test_cart", "fullName": "tests.test_cart.py.test_cart"}),
    );
    let reports = ReportDirectory::new(dir.path());

    let found = reports.find_result("tests/test_cart.py::test_cart");
    assert_eq!(found, Some((path, MatchRule::FullName)));
}

#[test]
fn missing_directory_matches_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let reports = ReportDirectory::new(dir.path().join("absent"));

    let outcome = reports
        .attach_video("tests/test_cart.py::test_cart", "test_cart.mp4")
        .expect("attach");
    assert_eq!(outcome, AttachOutcome::NoMatch);
}
