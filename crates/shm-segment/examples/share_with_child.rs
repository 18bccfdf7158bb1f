#![allow(clippy::expect_used, clippy::panic)]

//! Share a segment with a child process.
//!
//! The parent creates a segment, writes a byte, and re-runs this example
//! with the segment id as argument. The child attaches, prints what it
//! sees, and writes a reply the parent then reads back.
//!
//! Usage:
//!   cargo run --example share_with_child -p shm-segment

#[cfg(unix)]
fn main() {
    use shm_segment::{Segment, SegmentId};
    use std::process::Command;

    if let Some(arg) = std::env::args().nth(1) {
        let id: SegmentId = arg.parse().expect("segment id");
        let mut segment = Segment::open(id).expect("failed to open segment");
        segment.attach().expect("failed to attach");
        let bytes = segment.as_mut_slice().expect("attached");
        println!("child:  byte 0 = {:#04x}", bytes[0]);
        bytes[1] = 0xCD;
        return;
    }

    let mut segment = Segment::create(4096).expect("failed to create segment");
    segment.attach().expect("failed to attach");
    segment.as_mut_slice().expect("attached")[0] = 0xAB;
    println!("parent: created segment {} ({} bytes)", segment.id(), segment.size());

    let exe = std::env::current_exe().expect("current exe");
    let status = Command::new(exe)
        .arg(segment.id().to_string())
        .status()
        .expect("failed to spawn child");
    assert!(status.success(), "child failed: {status}");

    println!("parent: byte 1 = {:#04x}", segment.as_slice().expect("attached")[1]);
    segment.release().expect("failed to release");
}

#[cfg(not(unix))]
fn main() {
    println!("System V shared memory is only available on Unix hosts");
}
