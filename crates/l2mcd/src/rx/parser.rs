//! Frame and PDU types plus the collaborator traits of the receive path.
//!
//! Wire-format parsing is not owned by this engine: the driver pre-filters
//! candidate frames to "IGMP or MLD protocol", and a [`PduParser`]
//! collaborator turns raw frames into typed PDUs. Parse failures are never
//! errors on the packet path; they become a discard or flood verdict.

use crate::group::GroupRecord;
use mcast_types::{GroupAddr, IpFamily, PortId, SourceAddr, VlanId};
use std::sync::Arc;

/// A snooped candidate frame as captured in driver context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub ingress_port: PortId,
    /// VLAN the forwarding plane classified the frame into.
    pub vlan_id: VlanId,
    pub family: IpFamily,
}

/// What to do with a frame the parser could not turn into a PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseVerdict {
    Discard,
    Flood,
}

/// A parsed membership-protocol PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPdu {
    /// Membership query. `group` is `None` for a general query.
    Query {
        family: IpFamily,
        group: Option<GroupAddr>,
        /// Source address of the querier, for election.
        source: SourceAddr,
        version: u8,
    },
    /// Membership report. v1/v2 joins arrive as a single any-source record.
    Report {
        family: IpFamily,
        version: u8,
        records: Vec<GroupRecord>,
    },
    /// IGMPv2 Leave / MLDv1 Done.
    Leave { family: IpFamily, group: GroupAddr },
}

impl ParsedPdu {
    pub fn family(&self) -> IpFamily {
        match self {
            ParsedPdu::Query { family, .. }
            | ParsedPdu::Report { family, .. }
            | ParsedPdu::Leave { family, .. } => *family,
        }
    }
}

/// PDU parsing collaborator.
pub trait PduParser: Send + Sync {
    fn parse(&self, frame: &RawFrame) -> Result<ParsedPdu, ParseVerdict>;
}

/// Receiver half handed to the frame source: called in driver context and
/// must return quickly. The return value tells the driver whether the frame
/// was consumed.
pub trait FrameDeliver: Send + Sync {
    fn deliver(&self, frame: RawFrame) -> bool;
}

/// Handle of a frame-source registration.
pub type FrameSourceHandle = u64;

/// Pre-filter the source applies in driver context before copying a frame.
pub type FramePredicate = fn(&RawFrame) -> bool;

/// The forwarding plane's frame tap.
pub trait FrameSource: Send + Sync {
    /// Registers a delivery sink for frames matching the predicate.
    fn register(&self, predicate: FramePredicate, sink: Arc<dyn FrameDeliver>)
        -> FrameSourceHandle;
    fn unregister(&self, handle: FrameSourceHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdu_family() {
        let pdu = ParsedPdu::Leave {
            family: IpFamily::Ipv6,
            group: "ff05::1".parse().unwrap(),
        };
        assert_eq!(pdu.family(), IpFamily::Ipv6);
    }
}
