//! # Link dispatcher
//!
//! One background thread per connection pumps the physical link: it
//! receives with a short timeout, routes each packet to the subsystem
//! owning its port and drives the reset pipeline that brings a fresh
//! connection to the READY state:
//!
//! 1. the platform handshake resolves the protocol version,
//! 2. the log subsystem resets and fetches its TOC,
//! 3. the parameter subsystem resets, fetches its TOC and drains the
//!    extended attributes,
//! 4. an "update all" pass reads every parameter value.
//!
//! The connection owner is notified when the log TOC is ready and again
//! when every parameter value has been read. The thread also keeps a
//! packets-per-second figure and raises `timed_out` after three
//! consecutive seconds with fewer than two packets; the flag is
//! informational and the link keeps trying.

use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::warn;

use crate::crtp::Port;
use crate::link::{LinkConnection, Uplink};
use crate::subsystems::log::Log;
use crate::subsystems::param::Param;
use crate::subsystems::platform::Platform;

const RECEIVE_TIMEOUT: Duration = Duration::from_millis(1);

/// Seconds with almost no traffic before the link counts as timed out.
const PACKET_TIMEOUT_SECS: u32 = 3;

/// Callbacks for the connection milestones.
///
/// Implementations are invoked from the dispatcher thread, so they should
/// hand any heavy work to their own thread.
pub trait PortOwner: Send + Sync {
    /// The log TOC is complete; log blocks can be added.
    fn log_reset_complete(&self) {}

    /// Every parameter has a value; the connection is fully up.
    fn param_reset_complete(&self) {}
}

/// Owner that ignores every milestone.
pub(crate) struct NullOwner;

impl PortOwner for NullOwner {}

pub(crate) struct DispatchCtx {
    pub link: Arc<dyn LinkConnection>,
    pub uplink: Arc<Uplink>,
    pub log: Arc<Log>,
    pub param: Arc<Param>,
    pub platform: Arc<Platform>,
    pub owner: Arc<dyn PortOwner>,
}

/// The per-connection packet pump.
pub(crate) struct CrtpDispatch {
    ctx: Arc<DispatchCtx>,
    running: Arc<AtomicBool>,
    packets_per_second: Arc<AtomicU64>,
    timed_out: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CrtpDispatch {
    pub fn new(ctx: DispatchCtx) -> CrtpDispatch {
        CrtpDispatch {
            ctx: Arc::new(ctx),
            running: Arc::new(AtomicBool::new(false)),
            packets_per_second: Arc::new(AtomicU64::new(0f64.to_bits())),
            timed_out: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    /// Spawn the dispatcher thread.
    pub fn start(&self) {
        if self.running.swap(true, Relaxed) {
            return;
        }
        let ctx = self.ctx.clone();
        let running = self.running.clone();
        let packets_per_second = self.packets_per_second.clone();
        let timed_out = self.timed_out.clone();
        let handle = thread::Builder::new()
            .name("crtp-dispatch".to_owned())
            .spawn(move || run(ctx, running, packets_per_second, timed_out))
            .expect("spawning the dispatcher cannot fail");
        *self.thread.lock().unwrap() = Some(handle);
    }

    /// Stop the pump and join its thread. Safe to call more than once.
    pub fn stop(&self) {
        self.running.store(false, Relaxed);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Inbound packets per second, averaged over the last second.
    pub fn packets_per_second(&self) -> f64 {
        f64::from_bits(self.packets_per_second.load(Relaxed))
    }

    /// True while the link sees almost no traffic.
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Relaxed)
    }
}

/// Stages of the post-connect reset pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pipeline {
    AwaitLogReady,
    AwaitParamTocReady,
    AwaitParamValues,
    Ready,
}

fn run(
    ctx: Arc<DispatchCtx>,
    running: Arc<AtomicBool>,
    packets_per_second: Arc<AtomicU64>,
    timed_out: Arc<AtomicBool>,
) {
    let mut pipeline = Pipeline::AwaitLogReady;
    let mut packet_count: u32 = 0;
    let mut no_packet_secs: u32 = 0;
    let mut timeout_reported = false;
    let mut last_second = Instant::now();

    while running.load(Relaxed) {
        match ctx.link.recv_packet(RECEIVE_TIMEOUT) {
            Ok(Some(packet)) => {
                match packet.port() {
                    Port::Logging => ctx.log.handle_packet(&packet),
                    Port::Param => ctx.param.handle_packet(&packet),
                    Port::LinkCtrl | Port::Platform => ctx.platform.handle_packet(&packet),
                    _ => {}
                }
                packet_count += 1;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("link receive failed: {}", e);
                ctx.uplink.mark_failed();
                return;
            }
        }

        // the param worker flips reset flags on its own thread, so the
        // pipeline advances on every iteration, not only on packets
        pipeline = advance_pipeline(&ctx, pipeline);

        let elapsed = last_second.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let pps = packet_count as f64 / elapsed.as_secs_f64();
            packets_per_second.store(pps.to_bits(), Relaxed);
            if packet_count < 2 {
                no_packet_secs += 1;
            } else {
                no_packet_secs = 0;
            }
            packet_count = 0;
            last_second = Instant::now();

            if no_packet_secs >= PACKET_TIMEOUT_SECS {
                timed_out.store(true, Relaxed);
                if !timeout_reported {
                    warn!("packets timed out");
                    timeout_reported = true;
                }
            } else {
                timed_out.store(false, Relaxed);
                timeout_reported = false;
            }
        }
    }
}

fn advance_pipeline(ctx: &DispatchCtx, stage: Pipeline) -> Pipeline {
    match stage {
        Pipeline::AwaitLogReady if ctx.log.reset_complete() => {
            ctx.owner.log_reset_complete();
            ctx.param.reset();
            Pipeline::AwaitParamTocReady
        }
        Pipeline::AwaitParamTocReady if ctx.param.reset_complete() => {
            ctx.param.update_all();
            Pipeline::AwaitParamValues
        }
        Pipeline::AwaitParamValues if ctx.param.all_updated() => {
            ctx.owner.param_reset_complete();
            Pipeline::Ready
        }
        stage => stage,
    }
}
