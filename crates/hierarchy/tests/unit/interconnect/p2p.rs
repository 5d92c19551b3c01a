//! Point-to-point link tests.

use cohsim_core::common::error::SubmitStatus;
use cohsim_core::common::{CtrlId, LinkId};
use cohsim_core::interconnect::{BusPhase, Interconnect, PointToPointLink};
use cohsim_core::message::{Message, Sender};
use cohsim_core::pool::OpKind;

use crate::common::{LinkBench, small_config};

fn linked_pair() -> PointToPointLink {
    let mut link = PointToPointLink::new(LinkId(0), "wire");
    assert_eq!(link.register(CtrlId(0)), 0);
    assert_eq!(link.register(CtrlId(1)), 1);
    link
}

#[test]
fn forwards_to_the_opposite_endpoint_same_cycle() {
    let config = small_config();
    let mut bench = LinkBench::new(&config);
    let mut link = linked_pair();

    let r = bench.request(0, 0x1000, OpKind::Read);
    let msg = Message::new(Sender::Controller(CtrlId(0)), r);
    let status = link.submit(msg, &mut bench.ctx());
    assert_eq!(status, SubmitStatus::Queued);

    // Zero delay: the delivery is due on the very next drain.
    let delivered = bench.pump(&mut link, 1);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, CtrlId(1));
    assert_eq!(delivered[0].1.request, r);
    assert_eq!(delivered[0].1.sender, Sender::Interconnect(LinkId(0)));
}

#[test]
fn forwards_back_from_the_second_endpoint() {
    let config = small_config();
    let mut bench = LinkBench::new(&config);
    let mut link = linked_pair();

    let r = bench.request(1, 0x2000, OpKind::Write);
    let msg = Message::new(Sender::Controller(CtrlId(1)), r).with_data(true);
    let _ = link.submit(msg, &mut bench.ctx());

    let delivered = bench.pump(&mut link, 1);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, CtrlId(0));
    assert!(delivered[0].1.has_data);
}

#[test]
fn has_zero_delay_and_no_queue_state() {
    let link = PointToPointLink::new(LinkId(0), "wire");
    assert_eq!(link.delay(), 0);
    assert!(!link.is_busy(BusPhase::Command));
    assert!(!link.is_busy(BusPhase::Data));
}

#[test]
#[should_panic(expected = "both endpoints already registered")]
fn third_endpoint_is_rejected() {
    let mut link = PointToPointLink::new(LinkId(0), "wire");
    let _ = link.register(CtrlId(0));
    let _ = link.register(CtrlId(1));
    let _ = link.register(CtrlId(2));
}

#[test]
fn annul_is_a_no_op() {
    let config = small_config();
    let mut bench = LinkBench::new(&config);
    let mut link = linked_pair();

    let r = bench.request(0, 0x3000, OpKind::Read);
    link.annul(r, &mut bench.ctx());
    assert_eq!(bench.pool.get(r).refcount(), 1);
}

#[test]
fn fast_path_routes_to_the_other_end() {
    let config = small_config();
    let mut bench = LinkBench::new(&config);
    let link = linked_pair();

    assert_eq!(link.fast_path_target(CtrlId(0)), Some(CtrlId(1)));
    assert_eq!(link.fast_path_target(CtrlId(1)), Some(CtrlId(0)));
}
