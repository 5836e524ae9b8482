use crate::Vfs;

use super::mount;

#[tokio::test]
async fn test_second_create_rejected_while_open() {
    let tmp = tempfile::tempdir().unwrap();
    let fs = mount(tmp.path()).await;

    let first = fs.create("/x/y").await.unwrap();
    assert!(first.is_some());
    assert!(fs.create("/x/y").await.unwrap().is_none());

    fs.close(&first.unwrap()).await;
    // Closed: a new writer may take over.
    assert!(fs.create("/x/y").await.unwrap().is_some());
}

#[tokio::test]
async fn test_open_rejected_while_writer_active() {
    let tmp = tempfile::tempdir().unwrap();
    let fs = mount(tmp.path()).await;

    let writer = fs.create("/x/y").await.unwrap().unwrap();
    fs.write(&writer, b"data").await.unwrap();
    assert!(fs.open("/x/y").await.unwrap().is_none());

    fs.close(&writer).await;
    assert!(fs.open("/x/y").await.unwrap().is_some());
}

#[tokio::test]
async fn test_create_rejected_while_reader_active() {
    let tmp = tempfile::tempdir().unwrap();
    let fs = mount(tmp.path()).await;

    let writer = fs.create("/x/y").await.unwrap().unwrap();
    fs.write(&writer, b"data").await.unwrap();
    fs.close(&writer).await;

    let reader = fs.open("/x/y").await.unwrap().unwrap();
    assert!(fs.create("/x/y").await.unwrap().is_none());

    fs.close(&reader).await;
    assert!(fs.create("/x/y").await.unwrap().is_some());
}

#[tokio::test]
async fn test_reader_count_gates_removal() {
    let tmp = tempfile::tempdir().unwrap();
    let fs = mount(tmp.path()).await;

    let writer = fs.create("/x/y").await.unwrap().unwrap();
    fs.write(&writer, b"data").await.unwrap();
    fs.close(&writer).await;

    let first = fs.open("/x/y").await.unwrap().unwrap();
    let second = fs.open("/x/y").await.unwrap().unwrap();

    fs.close(&first).await;
    // One reader remains; the file stays open and readable.
    let mut out = [0u8; 4];
    assert_eq!(fs.read(&second, &mut out).await.unwrap(), 4);
    assert_eq!(&out, b"data");
    // And a writer is still excluded.
    assert!(fs.create("/x/y").await.unwrap().is_none());

    fs.close(&second).await;
    assert!(fs.create("/x/y").await.unwrap().is_some());
}

#[tokio::test]
async fn test_write_handle_removed_on_single_close() {
    let tmp = tempfile::tempdir().unwrap();
    let fs = mount(tmp.path()).await;

    let writer = fs.create("/x/y").await.unwrap().unwrap();
    fs.write(&writer, b"data").await.unwrap();
    // One close is enough for a writer, no matter how it was obtained.
    fs.close(&writer).await;
    assert!(fs.open("/x/y").await.unwrap().is_some());
}

#[tokio::test]
async fn test_closed_handle_reads_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let fs = mount(tmp.path()).await;

    let writer = fs.create("/x/y").await.unwrap().unwrap();
    fs.write(&writer, b"data").await.unwrap();
    fs.close(&writer).await;

    let reader = fs.open("/x/y").await.unwrap().unwrap();
    let stale = reader.clone();
    fs.close(&reader).await;

    let mut out = [0u8; 4];
    assert_eq!(fs.read(&stale, &mut out).await.unwrap(), 0);
    assert_eq!(fs.write(&stale, b"zz").await.unwrap(), 0);
}

#[tokio::test]
async fn test_stale_close_does_not_evict_new_writer() {
    let tmp = tempfile::tempdir().unwrap();
    let fs = mount(tmp.path()).await;

    let writer = fs.create("/x/y").await.unwrap().unwrap();
    fs.write(&writer, b"data").await.unwrap();
    fs.close(&writer).await;

    let reader = fs.open("/x/y").await.unwrap().unwrap();
    let stale = reader.clone();
    fs.close(&reader).await;

    let writer = fs.create("/x/y").await.unwrap().unwrap();
    // Closing the stale reader again must not release the new writer's
    // claim on the path.
    fs.close(&stale).await;
    assert!(fs.open("/x/y").await.unwrap().is_none());
    fs.close(&writer).await;
}
