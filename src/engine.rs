//! The worker threads that dequeue packets from NFQUEUE, run the active
//! recipe, and re-inject the result. One worker per bound queue, mirroring
//! the teacher's one-thread-per-interface `rx`/`tx` split, but collapsed to
//! a single dequeue-transform-reinject loop per queue instead of a
//! stack-wide dispatch table.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use nfq::{Queue, Verdict};
use pnet::transport::{self, TransportChannelType, TransportSender};
use pnet::packet::ip::IpNextHeaderProtocols;

use crate::capture::CaptureRegistry;
use crate::errors::EngineError;
use crate::generator::Recipe;
use crate::packet::{FrameSink, Packet, PacketList};

/// Which side of the local host a queued packet is on, derived from
/// queue-id parity: even queue numbers are egress, odd are ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ingress => write!(f, "ingress"),
            Direction::Egress => write!(f, "egress"),
        }
    }
}

impl Direction {
    fn of_queue_num(qnum: u16) -> Direction {
        if qnum % 2 == 0 {
            Direction::Egress
        } else {
            Direction::Ingress
        }
    }
}

/// An atomically-swappable slot shared between the driver and a worker.
/// Readers take a shared lock for the duration of one `apply`/capture
/// write; the driver takes an exclusive lock only to swap the value.
type Slot<T> = Arc<RwLock<Option<T>>>;

fn empty_slot<T>() -> Slot<T> {
    Arc::new(RwLock::new(None))
}

/// A raw L3 socket re-injection sink, built on `pnet::transport` the same
/// way the teacher builds its Ethernet datalink channels on `pnet::datalink`
/// — both are thin wrappers the `pnet` crate already ships, just at the L3
/// layer instead of L2.
pub struct RawSocketSink {
    v4: TransportSender,
    v6: TransportSender,
}

impl RawSocketSink {
    pub fn open() -> Result<RawSocketSink, EngineError> {
        let v4_proto = TransportChannelType::Layer3(IpNextHeaderProtocols::Ipv4);
        let (v4, _) = transport::transport_channel(4096, v4_proto)
            .map_err(|source| EngineError::QueueBind { qnum: 0, source })?;
        let v6_proto = TransportChannelType::Layer3(IpNextHeaderProtocols::Ipv6);
        let (v6, _) = transport::transport_channel(4096, v6_proto)
            .map_err(|source| EngineError::QueueBind { qnum: 0, source })?;
        Ok(RawSocketSink { v4, v6 })
    }
}

impl FrameSink for RawSocketSink {
    fn send_v4(&mut self, dst: Ipv4Addr, bytes: &[u8]) -> Result<(), crate::errors::PacketError> {
        self.v4
            .send_to(pnet::packet::ipv4::Ipv4Packet::new(bytes).ok_or_else(|| {
                crate::errors::PacketError::Malformed("truncated IPv4 header on send".into())
            })?, std::net::IpAddr::V4(dst))
            .map(|_| ())
            .map_err(crate::errors::PacketError::Io)
    }

    fn send_v6(&mut self, dst: Ipv6Addr, bytes: &[u8]) -> Result<(), crate::errors::PacketError> {
        self.v6
            .send_to(pnet::packet::ipv6::Ipv6Packet::new(bytes).ok_or_else(|| {
                crate::errors::PacketError::Malformed("truncated IPv6 header on send".into())
            })?, std::net::IpAddr::V6(dst))
            .map(|_| ())
            .map_err(crate::errors::PacketError::Io)
    }

    fn send_link(&mut self, _bytes: &[u8]) -> Result<(), crate::errors::PacketError> {
        Err(crate::errors::PacketError::Malformed(
            "raw L3 socket cannot send a non-IP frame".into(),
        ))
    }
}

/// One bound queue plus its stop flag and join handle.
struct Worker {
    qnum: u16,
    direction: Direction,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Runs the transformation pipeline for packets on the engine's queues.
/// Owns the ingress/egress recipe slots and local/remote capture-path
/// slots that the driver swaps between test cases.
pub struct Engine {
    workers: Vec<Worker>,
    ingress_recipe: Slot<Recipe>,
    egress_recipe: Slot<Recipe>,
    local_capture: Slot<std::path::PathBuf>,
    remote_capture: Slot<std::path::PathBuf>,
    fatal: Arc<Mutex<Option<EngineError>>>,
    captures: Arc<CaptureRegistry>,
}

impl Engine {
    /// Binds a queue pair for `qnum` (egress) and `qnum + 1` (ingress) and
    /// starts their worker threads.
    pub fn start(qnum: u16) -> Result<Engine, EngineError> {
        let ingress_recipe = empty_slot();
        let egress_recipe = empty_slot();
        let local_capture = empty_slot();
        let remote_capture = empty_slot();
        let fatal = Arc::new(Mutex::new(None));
        let captures = Arc::new(CaptureRegistry::new());

        let mut workers = Vec::new();
        for queue_num in [qnum, qnum + 1] {
            let direction = Direction::of_queue_num(queue_num);
            let stop = Arc::new(AtomicBool::new(false));
            let worker_stop = Arc::clone(&stop);
            let worker_ingress = Arc::clone(&ingress_recipe);
            let worker_egress = Arc::clone(&egress_recipe);
            let worker_local = Arc::clone(&local_capture);
            let worker_remote = Arc::clone(&remote_capture);
            let worker_fatal = Arc::clone(&fatal);
            let worker_captures = Arc::clone(&captures);

            let mut queue = Queue::open().map_err(|source| EngineError::QueueBind { qnum: queue_num, source })?;
            queue
                .bind(queue_num)
                .map_err(|source| EngineError::QueueBind { qnum: queue_num, source })?;

            let handle = std::thread::spawn(move || {
                run_worker(
                    queue,
                    queue_num,
                    direction,
                    worker_stop,
                    worker_ingress,
                    worker_egress,
                    worker_local,
                    worker_remote,
                    worker_fatal,
                    worker_captures,
                );
            });

            workers.push(Worker { qnum: queue_num, direction, stop, handle: Some(handle) });
        }

        Ok(Engine { workers, ingress_recipe, egress_recipe, local_capture, remote_capture, fatal, captures })
    }

    /// Atomically swaps in a new recipe for the given direction. Takes
    /// effect on the next dequeued packet; in-flight `apply` calls finish
    /// against the recipe they started with.
    pub fn install_recipe(&self, direction: Direction, recipe: Recipe) {
        let slot = match direction {
            Direction::Ingress => &self.ingress_recipe,
            Direction::Egress => &self.egress_recipe,
        };
        *slot.write().unwrap() = Some(recipe);
    }

    pub fn set_capture_paths(&self, local: Option<std::path::PathBuf>, remote: Option<std::path::PathBuf>) {
        *self.local_capture.write().unwrap() = local;
        *self.remote_capture.write().unwrap() = remote;
    }

    /// Returns the first fatal error raised by any worker, if any, without
    /// consuming it.
    pub fn fatal_error(&self) -> Option<String> {
        self.fatal.lock().unwrap().as_ref().map(|e| e.to_string())
    }

    /// Signals every worker to stop, joins them, and closes their capture
    /// files. Idempotent: safe to call after a partial startup.
    pub fn stop(mut self) -> Result<(), EngineError> {
        for worker in &self.workers {
            worker.stop.store(true, Ordering::SeqCst);
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                debug!("joining worker for queue {} ({})", worker.qnum, worker.direction);
                let _ = handle.join();
            }
        }
        if let Some(err) = self.fatal.lock().unwrap().take() {
            return Err(err);
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    mut queue: Queue,
    qnum: u16,
    direction: Direction,
    stop: Arc<AtomicBool>,
    ingress_recipe: Slot<Recipe>,
    egress_recipe: Slot<Recipe>,
    local_capture: Slot<std::path::PathBuf>,
    remote_capture: Slot<std::path::PathBuf>,
    fatal: Arc<Mutex<Option<EngineError>>>,
    captures: Arc<CaptureRegistry>,
) {
    let mut sink = match RawSocketSink::open() {
        Ok(sink) => sink,
        Err(err) => {
            error!("queue {}: could not open re-injection socket: {}", qnum, err);
            *fatal.lock().unwrap() = Some(err);
            return;
        }
    };

    info!("worker for queue {} ({}) running", qnum, direction);
    while !stop.load(Ordering::SeqCst) {
        let msg = match queue.recv() {
            Ok(msg) => msg,
            Err(err) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                error!("queue {}: recv failed: {}", qnum, err);
                *fatal.lock().unwrap() = Some(EngineError::QueueRecv { qnum, source: err });
                break;
            }
        };

        let raw = msg.get_payload().to_vec();
        let pre_capture = match direction {
            Direction::Ingress => &remote_capture,
            Direction::Egress => &local_capture,
        };
        capture_if_set(&captures, pre_capture, &raw);

        let recipe_slot = match direction {
            Direction::Ingress => &ingress_recipe,
            Direction::Egress => &egress_recipe,
        };
        let guard = recipe_slot.read().unwrap();
        let recipe = match guard.as_ref() {
            Some(recipe) => recipe,
            None => {
                drop(guard);
                error!("queue {}: no active recipe for {}", qnum, direction);
                *fatal.lock().unwrap() = Some(EngineError::NoActiveRecipe(direction));
                let _ = queue.verdict(msg);
                break;
            }
        };

        let pkt = Packet::from_raw(raw.clone());
        let mut pl = PacketList::singleton(pkt);
        for op in recipe {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| op.apply(pl.clone())));
            pl = match outcome {
                Ok(next) => next,
                Err(_) => {
                    warn!("queue {}: operator '{}' panicked, packet accepted unchanged", qnum, op.name());
                    pl
                }
            };
        }
        drop(guard);

        let post_capture = match direction {
            Direction::Ingress => &local_capture,
            Direction::Egress => &remote_capture,
        };

        let mut msg = msg;
        match direction {
            Direction::Ingress => match pl.len() {
                0 => {
                    msg.set_verdict(Verdict::Drop);
                }
                1 => {
                    let bytes = pl.get(0).unwrap().bytes().to_vec();
                    capture_if_set(&captures, post_capture, &bytes);
                    msg.set_payload(bytes);
                    msg.set_verdict(Verdict::Accept);
                }
                n => {
                    warn!("queue {}: ingress recipe produced {} packets, forwarding the first and injecting the rest", qnum, n);
                    let first = pl.get(0).unwrap();
                    let first_bytes = first.bytes().to_vec();
                    capture_if_set(&captures, post_capture, &first_bytes);
                    msg.set_payload(first_bytes);
                    msg.set_verdict(Verdict::Accept);
                    let rest: PacketList = pl.as_slice()[1..].iter().cloned().collect();
                    if let Err(err) = rest.send_all(&mut sink) {
                        error!("queue {}: failed to inject remainder packets: {}", qnum, err);
                    }
                }
            },
            Direction::Egress => {
                for pkt in pl.iter() {
                    capture_if_set(&captures, post_capture, pkt.bytes());
                }
                if let Err(err) = pl.send_all(&mut sink) {
                    error!("queue {}: failed to send re-injected packets: {}", qnum, err);
                }
                msg.set_verdict(Verdict::Drop);
            }
        }

        if let Err(err) = queue.verdict(msg) {
            error!("queue {}: verdict failed: {}", qnum, err);
        }
    }
    info!("worker for queue {} ({}) stopped", qnum, direction);
}

fn capture_if_set(captures: &CaptureRegistry, slot: &Slot<std::path::PathBuf>, bytes: &[u8]) {
    if let Some(path) = slot.read().unwrap().as_ref() {
        if let Err(err) = captures.append(path, bytes) {
            warn!("capture write to {:?} failed: {}", path, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_from_queue_num_parity() {
        assert_eq!(Direction::of_queue_num(10), Direction::Egress);
        assert_eq!(Direction::of_queue_num(11), Direction::Ingress);
    }

    #[test]
    fn direction_display_is_lowercase() {
        assert_eq!(Direction::Ingress.to_string(), "ingress");
        assert_eq!(Direction::Egress.to_string(), "egress");
    }
}
