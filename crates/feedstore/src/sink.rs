//! Boundary to a remote ingestion service that accepts one point per call.
//!
//! No transport is provided here. Callers implement [`IngestSink`] over
//! their HTTP client of choice; [`publish`] enforces the acknowledgement
//! contract: the service must answer with status 200 and echo the posted
//! value back in the body.

use crate::error::{FeedError, Result};
use crate::store::{Point, Timestamp};
use tracing::debug;

/// HTTP-style success status.
pub const STATUS_OK: u16 = 200;

/// One point posted to the sink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IngestPoint {
    /// Target feed.
    pub feed_id: u32,
    /// Unix time in seconds.
    pub time: Timestamp,
    /// Value; never missing.
    pub value: f32,
}

/// Response returned by a sink for one post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkResponse {
    /// Status code.
    pub status: u16,
    /// Response body; expected to echo the posted value.
    pub body: String,
}

impl SinkResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// A remote ingestion endpoint.
pub trait IngestSink {
    /// Posts one point.
    fn post(&mut self, point: &IngestPoint) -> Result<SinkResponse>;
}

/// Counts from a [`publish`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Points accepted by the sink.
    pub posted: u64,
    /// Missing samples not sent.
    pub skipped: u64,
}

/// Posts every non-missing point of a sequence to `sink`, in order.
///
/// # Errors
///
/// Returns `FeedError::SinkRejected` on the first non-200 status or body
/// that does not parse back to the posted value. Points before it remain
/// posted.
pub fn publish<I, S>(feed_id: u32, points: I, sink: &mut S) -> Result<PublishReport>
where
    I: IntoIterator<Item = Result<Point>>,
    S: IngestSink + ?Sized,
{
    let mut report = PublishReport::default();
    for point in points {
        let point = point?;
        let Some(value) = point.value.filter(|v| !v.is_nan()) else {
            report.skipped += 1;
            continue;
        };
        let ingest = IngestPoint {
            feed_id,
            time: point.time,
            value,
        };
        let response = sink.post(&ingest)?;
        check_response(&ingest, &response)?;
        report.posted += 1;
    }
    debug!(
        "Published {} points to feed {} ({} missing skipped)",
        report.posted, feed_id, report.skipped
    );
    Ok(report)
}

fn check_response(point: &IngestPoint, response: &SinkResponse) -> Result<()> {
    let rejected = |reason: String| FeedError::SinkRejected {
        time: point.time,
        value: point.value,
        reason,
    };
    if response.status != STATUS_OK {
        return Err(rejected(format!("status {}", response.status)));
    }
    match response.body.trim().parse::<f32>() {
        Ok(echoed) if echoed == point.value => Ok(()),
        _ => Err(rejected(format!("unexpected echo {:?}", response.body))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct EchoSink {
        posted: Vec<IngestPoint>,
        fail_at: Option<usize>,
    }

    impl IngestSink for EchoSink {
        fn post(&mut self, point: &IngestPoint) -> Result<SinkResponse> {
            self.posted.push(*point);
            if self.fail_at == Some(self.posted.len()) {
                return Ok(SinkResponse::new(500, "Internal Server Error"));
            }
            Ok(SinkResponse::new(STATUS_OK, point.value.to_string()))
        }
    }

    fn points(values: &[Option<f32>]) -> Vec<Result<Point>> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Ok(Point::new(1000 + i as i64 * 10, *v)))
            .collect()
    }

    #[test]
    fn test_publish_skips_missing() {
        let mut sink = EchoSink::default();
        let report = publish(7, points(&[Some(1.5), None, Some(0.0)]), &mut sink).unwrap();
        assert_eq!(report, PublishReport { posted: 2, skipped: 1 });
        assert_eq!(sink.posted[1].time, 1020);
        assert_eq!(sink.posted[1].feed_id, 7);
    }

    #[test]
    fn test_publish_stops_on_bad_status() {
        let mut sink = EchoSink {
            fail_at: Some(2),
            ..Default::default()
        };
        let result = publish(1, points(&[Some(1.0), Some(2.0), Some(3.0)]), &mut sink);
        assert!(matches!(
            result,
            Err(FeedError::SinkRejected { time: 1010, .. })
        ));
        assert_eq!(sink.posted.len(), 2);
    }

    #[test]
    fn test_check_response_echo() {
        let point = IngestPoint {
            feed_id: 1,
            time: 5,
            value: 21.25,
        };
        assert!(check_response(&point, &SinkResponse::new(200, "21.25\n")).is_ok());
        assert!(check_response(&point, &SinkResponse::new(200, "21.250")).is_ok());
        assert!(check_response(&point, &SinkResponse::new(200, "false")).is_err());
        assert!(check_response(&point, &SinkResponse::new(200, "21.3")).is_err());
    }
}
