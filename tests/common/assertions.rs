// Custom test assertions for integration tests

use bytes::Bytes;

/// Poll a condition until it holds, failing the test after a timeout.
///
/// `assert_eventually!(cond, timeout_ms)` polls every 20ms;
/// `assert_eventually!(@ cond, timeout_ms, interval_ms)` sets the interval.
#[macro_export]
macro_rules! assert_eventually {
    ($cond:expr, $timeout_ms:expr) => {
        assert_eventually!(@ $cond, $timeout_ms, 20)
    };
    (@ $cond:expr, $timeout_ms:expr, $interval_ms:expr) => {{
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis($timeout_ms);
        let mut passed = $cond;
        while !passed && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis($interval_ms)).await;
            passed = $cond;
        }
        assert!(
            passed,
            "`{}` did not hold within {}ms",
            stringify!($cond),
            $timeout_ms
        );
    }};
}

fn show(record: &Bytes) -> String {
    String::from_utf8_lossy(record).into_owned()
}

/// Assert two record sequences are equal, naming the first difference.
pub fn assert_records_match(actual: &[Bytes], expected: &[Bytes]) {
    if let Some(i) = actual.iter().zip(expected).position(|(a, e)| a != e) {
        panic!(
            "record {} differs\n  expected: {}\n  actual: {}",
            i,
            show(&expected[i]),
            show(&actual[i])
        );
    }
    assert_eq!(
        actual.len(),
        expected.len(),
        "record count mismatch (common prefix matches)"
    );
}
