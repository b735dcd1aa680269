//! Segments exchanged over the simulated link.
//!
//! Every message a [`crate::simulator::Endpoint`] carries is a [`Segment`]:
//! a small header (ports and sequence number) plus exactly one
//! [`SegmentKind`].  Because the link is in-process there is no byte-level
//! encoding; segments travel as plain values.
//!
//! # Kinds
//!
//! | Kind       | Meaning                                                   |
//! |------------|-----------------------------------------------------------|
//! | `Start`    | Connection-open request, or the listener's reply to one.  |
//! | `Teardown` | Half-close notice: the sender will emit no more data.     |
//! | `Data`     | Payload carrier.                                          |
//! | `Ack`      | Acknowledgement with advertised window and optional SACK. |
//!
//! A segment is always exactly one of these, so combinations such as
//! "start and teardown at once" cannot be expressed.

use std::fmt;

/// The primary kind of a [`Segment`], with the fields that only that kind
/// carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    /// Handshake request (client) or reply (spawned server connection).
    Start,
    /// Half-close notice.
    Teardown,
    /// Application bytes.
    Data { payload: Vec<u8> },
    /// Acknowledgement.
    Ack {
        /// Next sequence number the sender of the ACK expects.
        ack: u32,
        /// Advertised receive window in bytes.
        window: u16,
        /// Selectively acknowledged sequence number, if any.
        sack: Option<u32>,
    },
}

/// One unit of traffic on a [`crate::simulator::DuplexLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub src_port: u16,
    pub dst_port: u16,
    /// Sequence number of the first payload byte (or of the control unit).
    pub seq: u32,
    pub kind: SegmentKind,
}

impl Segment {
    pub fn start(src_port: u16, dst_port: u16) -> Self {
        Self::new(src_port, dst_port, 0, SegmentKind::Start)
    }

    pub fn teardown(src_port: u16, dst_port: u16) -> Self {
        Self::new(src_port, dst_port, 0, SegmentKind::Teardown)
    }

    /// Build a data segment carrying a copy of `payload`.
    pub fn data(src_port: u16, dst_port: u16, seq: u32, payload: &[u8]) -> Self {
        Self::new(
            src_port,
            dst_port,
            seq,
            SegmentKind::Data {
                payload: payload.to_vec(),
            },
        )
    }

    pub fn ack(src_port: u16, dst_port: u16, ack: u32, window: u16, sack: Option<u32>) -> Self {
        Self::new(src_port, dst_port, 0, SegmentKind::Ack { ack, window, sack })
    }

    fn new(src_port: u16, dst_port: u16, seq: u32, kind: SegmentKind) -> Self {
        Self {
            src_port,
            dst_port,
            seq,
            kind,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self.kind, SegmentKind::Start)
    }

    pub fn is_teardown(&self) -> bool {
        matches!(self.kind, SegmentKind::Teardown)
    }

    pub fn is_data(&self) -> bool {
        matches!(self.kind, SegmentKind::Data { .. })
    }

    pub fn is_ack(&self) -> bool {
        matches!(self.kind, SegmentKind::Ack { .. })
    }

    /// Payload bytes, empty for every kind other than `Data`.
    pub fn payload(&self) -> &[u8] {
        match &self.kind {
            SegmentKind::Data { payload } => payload.as_slice(),
            _ => &[],
        }
    }

    /// Short upper-case tag used in traces.
    pub fn tag(&self) -> &'static str {
        match self.kind {
            SegmentKind::Start => "START",
            SegmentKind::Teardown => "TEARDOWN",
            SegmentKind::Data { .. } => "DATA",
            SegmentKind::Ack { .. } => "ACK",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} src={} dst={}",
            self.tag(),
            self.src_port,
            self.dst_port
        )?;
        match &self.kind {
            SegmentKind::Start | SegmentKind::Teardown => write!(f, " seq={}", self.seq)?,
            SegmentKind::Data { payload } => {
                write!(f, " seq={} len={}", self.seq, payload.len())?
            }
            SegmentKind::Ack { ack, window, sack } => {
                write!(f, " ack={ack} wnd={window}")?;
                if let Some(sack) = sack {
                    write!(f, " sack={sack}")?;
                }
            }
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_exactly_one_kind() {
        let segs = [
            Segment::start(10, 80),
            Segment::teardown(10, 80),
            Segment::data(10, 80, 1, b"abc"),
            Segment::ack(80, 10, 4, 512, None),
        ];
        for seg in &segs {
            let kinds = [seg.is_start(), seg.is_teardown(), seg.is_data(), seg.is_ack()];
            assert_eq!(kinds.iter().filter(|k| **k).count(), 1, "{seg}");
        }
    }

    #[test]
    fn payload_is_empty_for_control_segments() {
        assert!(Segment::start(1, 2).payload().is_empty());
        assert!(Segment::ack(1, 2, 0, 0, Some(3)).payload().is_empty());
        assert_eq!(Segment::data(1, 2, 0, b"xyz").payload(), b"xyz");
    }

    #[test]
    fn display_matches_trace_format() {
        assert_eq!(Segment::start(10, 80).to_string(), "[START src=10 dst=80 seq=0]");
        assert_eq!(
            Segment::data(10, 80, 7, &[0u8; 5]).to_string(),
            "[DATA src=10 dst=80 seq=7 len=5]"
        );
        assert_eq!(
            Segment::ack(80, 10, 12, 1024, Some(20)).to_string(),
            "[ACK src=80 dst=10 ack=12 wnd=1024 sack=20]"
        );
        assert_eq!(
            Segment::ack(80, 10, 12, 1024, None).to_string(),
            "[ACK src=80 dst=10 ack=12 wnd=1024]"
        );
    }
}
