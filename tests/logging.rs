use local_notes_core_lib::start;

#[tokio::test]
async fn start_installs_file_logging_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let editor = start(dir.path()).expect("start");
    assert_eq!(editor.pages().len(), 1);
    assert!(dir.path().join("logs").is_dir());

    let second = tempfile::tempdir().expect("tempdir");
    assert!(start(second.path()).is_err());
}
