// Bandwidth ceiling timing

use bucketsync::sync::throttle::{BandwidthLimit, BandwidthLimiter, ThrottledReader};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;

#[tokio::test]
async fn test_one_burst_at_one_megabyte_per_second() {
    let mut limiter = BandwidthLimiter::new(BandwidthLimit::new(1_000_000));
    let start = Instant::now();
    limiter.acquire(2_000_000).await;
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(1950), "took {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "took {:?}", elapsed);
    assert_eq!(limiter.bytes_so_far(), 2_000_000);
}

#[tokio::test]
async fn test_zero_limit_adds_no_delay() {
    let mut limiter = BandwidthLimiter::new(BandwidthLimit::new(0));
    let start = Instant::now();
    limiter.acquire(2_000_000).await;
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn test_blocking_acquire_paces_chunks() {
    let mut limiter = BandwidthLimiter::new(BandwidthLimit::new(100_000));
    let start = Instant::now();
    for _ in 0..4 {
        limiter.acquire_blocking(10_000);
    }
    assert!(start.elapsed() >= Duration::from_millis(380));
}

#[tokio::test]
async fn test_throttled_reader_paces_stream() {
    let data = vec![7u8; 50_000];
    let mut reader = ThrottledReader::new(&data[..], BandwidthLimit::new(100_000));
    let mut buf = [0u8; 10_000];
    let mut out = Vec::new();

    let start = Instant::now();
    loop {
        let n = reader.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }

    assert_eq!(out, data);
    assert_eq!(reader.bytes_read(), 50_000);
    assert!(start.elapsed() >= Duration::from_millis(380), "took {:?}", start.elapsed());
}
