use util::buffer::Buffer;

#[tokio::test]
async fn test_buffer_write_read_round_trip() {
    let buffer = Buffer::new(0, 0);
    let n = buffer.write(&[0, 1]).await.unwrap();
    assert_eq!(n, 2);

    let mut out = [0u8; 4];
    let n = buffer.read(&mut out).await.unwrap();
    assert_eq!(n, 2);
    assert_eq!(&out[..2], &[0, 1]);
}

#[tokio::test]
async fn test_buffer_count_limit() {
    let buffer = Buffer::new(1, 0);
    buffer.write(&[1]).await.unwrap();
    let err = buffer.write(&[2]).await.unwrap_err();
    assert_eq!(err, util::Error::ErrBufferFull);
}

#[tokio::test]
async fn test_buffer_close_drains_then_errors() {
    let buffer = Buffer::new(0, 0);
    buffer.write(&[9]).await.unwrap();
    buffer.close().await;

    let mut out = [0u8; 1];
    // queued datagram is still delivered after close.
    let n = buffer.read(&mut out).await.unwrap();
    assert_eq!(n, 1);

    let err = buffer.read(&mut out).await.unwrap_err();
    assert_eq!(err, util::Error::ErrBufferClosed);
}
