//! Per-connection session: the control-plane negotiation, then the
//! concurrent ingress/egress bridge between a TCP socket and one
//! [`DeviceAdapter`] (SPEC_FULL.md §4.4/§5).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::device::DeviceAdapter;
use crate::error::SessionError;
use crate::export::{ExportEntry, ExportTable};
use crate::proto::{
    self, errno, CmdSubmit, CmdUnlink, Command, OpCode, OpHeader, OpRepDevlistHeader, OpReqImport, RetSubmit, RetUnlink,
    UsbIpHeaderBasic, ST_NA, ST_OK,
};

const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Run one accepted connection to completion. Never returns an error for
/// per-connection failures — those are logged and the connection is closed;
/// only a caller-visible bug (e.g. a poisoned mutex) panics.
pub async fn run(stream: TcpStream, table: Arc<ExportTable>, mut shutdown: watch::Receiver<bool>) {
    let _ = stream.set_nodelay(true);

    let (mut reader, mut writer) = stream.into_split();

    let attached = match negotiate(&mut reader, &mut writer, &table).await {
        Ok(Some(attached)) => attached,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "session negotiation failed");
            return;
        }
    };

    run_attached(reader, writer, attached, &mut shutdown).await;
}

/// An export entry this connection has successfully imported, plus the open
/// device adapter driving it. `Drop` releases the attachment so the entry
/// becomes available again.
struct Attached {
    entry: Arc<ExportEntry>,
    adapter: Arc<DeviceAdapter>,
}

impl Drop for Attached {
    fn drop(&mut self) {
        self.entry.release();
    }
}

async fn negotiate(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    table: &ExportTable,
) -> Result<Option<Attached>, SessionError> {
    loop {
        let mut header_bytes = [0u8; 8];
        if reader.read_exact(&mut header_bytes).await.is_err() {
            return Ok(None);
        }
        let header: OpHeader = proto::decode(&header_bytes).ok_or(SessionError::Protocol(crate::error::ProtocolError::Truncated))?;

        if header.version != proto::USBIP_VERSION {
            return Err(SessionError::Protocol(crate::error::ProtocolError::VersionMismatch {
                got: header.version,
                expected: proto::USBIP_VERSION,
            }));
        }

        match header.op_code() {
            Some(OpCode::ReqDevlist) => {
                reply_devlist(writer, table).await?;
                // Clients commonly disconnect after a bare DEVLIST query;
                // keep negotiating on this connection either way.
            }
            Some(OpCode::ReqImport) => {
                let mut busid_bytes = [0u8; 32];
                reader
                    .read_exact(&mut busid_bytes)
                    .await
                    .map_err(SessionError::Io)?;
                let mut body = Vec::with_capacity(8 + 32);
                body.extend_from_slice(&header_bytes);
                body.extend_from_slice(&busid_bytes);
                let req: OpReqImport = proto::decode(&body).ok_or(SessionError::Protocol(crate::error::ProtocolError::Truncated))?;
                let busid = req.busid.as_str().to_string();

                match try_import(table, &busid).await {
                    Some(attached) => {
                        reply_import_ok(writer, &attached.entry).await?;
                        info!(busid = %busid, "session attached");
                        return Ok(Some(attached));
                    }
                    None => {
                        reply_import_fail(writer).await?;
                        return Ok(None);
                    }
                }
            }
            _ => {
                return Err(SessionError::Protocol(crate::error::ProtocolError::UnexpectedOpCode(header.code)));
            }
        }
    }
}

async fn try_import(table: &ExportTable, busid: &str) -> Option<Attached> {
    let entry = table.get(busid)?;
    if !entry.try_attach() {
        return None;
    }
    match DeviceAdapter::open(&entry.device) {
        Ok(adapter) => Some(Attached { entry, adapter: Arc::new(adapter) }),
        Err(e) => {
            warn!(busid = %busid, error = %e, "failed to open device for import");
            entry.release();
            None
        }
    }
}

async fn reply_devlist(writer: &mut OwnedWriteHalf, table: &ExportTable) -> Result<(), SessionError> {
    let entries: Vec<_> = table.iter().cloned().collect();
    let mut body = proto::encode(&OpRepDevlistHeader {
        header: OpHeader::new(OpCode::RepDevlist, ST_OK),
        num_exported_devices: entries.len() as u32,
    });
    for entry in &entries {
        body.extend_from_slice(&proto::encode(&entry.to_wire_record()));
        for iface in entry.to_wire_interfaces() {
            body.extend_from_slice(&proto::encode(&iface));
        }
    }
    writer.write_all(&body).await.map_err(SessionError::Io)
}

async fn reply_import_ok(writer: &mut OwnedWriteHalf, entry: &ExportEntry) -> Result<(), SessionError> {
    let mut body = proto::encode(&OpHeader::new(OpCode::RepImport, ST_OK));
    body.extend_from_slice(&proto::encode(&entry.to_wire_record()));
    writer.write_all(&body).await.map_err(SessionError::Io)
}

async fn reply_import_fail(writer: &mut OwnedWriteHalf) -> Result<(), SessionError> {
    let body = proto::encode(&OpHeader::new(OpCode::RepImport, ST_NA));
    writer.write_all(&body).await.map_err(SessionError::Io)
}

struct InFlight {
    ep: u8,
    cancel_tx: oneshot::Sender<()>,
}

enum EgressEvent {
    /// A `CMD_SUBMIT` has been accepted and will eventually complete;
    /// registers its seqnum at the tail of `ep`'s FIFO.
    Submitted { ep: u8, seqnum: u32 },
    /// The transfer completed (successfully or with an error); held until
    /// it reaches the head of its endpoint's FIFO, then written.
    Completion { seqnum: u32, devid: u32, ep: u8, status: i32, data: Vec<u8> },
    /// The transfer was cancelled before completion; drop it from the FIFO
    /// without ever emitting a `RET_SUBMIT`.
    CancelPending { seqnum: u32, ep: u8 },
    /// Emit a `RET_UNLINK` immediately; unlink replies are not subject to
    /// the per-endpoint submit ordering.
    UnlinkReply { devid: u32, unlink_header_seqnum: u32, status: i32 },
}

async fn egress_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<EgressEvent>) {
    let mut pending: HashMap<u8, VecDeque<u32>> = HashMap::new();
    let mut results: HashMap<u32, (u32, i32, Vec<u8>)> = HashMap::new();

    while let Some(event) = rx.recv().await {
        match event {
            EgressEvent::Submitted { ep, seqnum } => {
                pending.entry(ep).or_default().push_back(seqnum);
            }
            EgressEvent::CancelPending { ep, seqnum } => {
                if let Some(queue) = pending.get_mut(&ep) {
                    queue.retain(|&s| s != seqnum);
                }
                // The seqnum behind this one in the FIFO may already be sitting
                // in `results` waiting for this one to clear the head.
                if !flush_ready(&mut pending, &mut results, ep, &mut writer).await {
                    return;
                }
            }
            EgressEvent::Completion { seqnum, devid, ep, status, data } => {
                results.insert(seqnum, (devid, status, data));
                if !flush_ready(&mut pending, &mut results, ep, &mut writer).await {
                    return;
                }
            }
            EgressEvent::UnlinkReply { devid, unlink_header_seqnum, status } => {
                let bytes = proto::encode(&RetUnlink::new(unlink_header_seqnum, devid, status));
                if writer.write_all(&bytes).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn flush_ready(
    pending: &mut HashMap<u8, VecDeque<u32>>,
    results: &mut HashMap<u32, (u32, i32, Vec<u8>)>,
    ep: u8,
    writer: &mut OwnedWriteHalf,
) -> bool {
    let Some(queue) = pending.get_mut(&ep) else { return true };
    while let Some(&head) = queue.front() {
        let Some((devid, status, data)) = results.remove(&head) else { break };
        queue.pop_front();
        let mut bytes = proto::encode(&RetSubmit::new(head, devid, ep as u32, status, data.len() as u32));
        bytes.extend_from_slice(&data);
        if writer.write_all(&bytes).await.is_err() {
            return false;
        }
    }
    true
}

async fn run_attached(mut reader: OwnedReadHalf, writer: OwnedWriteHalf, attached: Attached, shutdown: &mut watch::Receiver<bool>) {
    let Attached { entry, adapter } = attached;
    let devid = entry.devid();

    let (egress_tx, egress_rx) = mpsc::unbounded_channel();
    let egress_handle = tokio::spawn(egress_loop(writer, egress_rx));

    let in_flight: Arc<Mutex<HashMap<u32, InFlight>>> = Arc::new(Mutex::new(HashMap::new()));

    loop {
        let mut header_bytes = [0u8; 20];
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            result = reader.read_exact(&mut header_bytes) => {
                if result.is_err() {
                    break;
                }
                let header: UsbIpHeaderBasic = match proto::decode(&header_bytes) {
                    Some(h) => h,
                    None => break,
                };
                let Ok(command) = Command::try_from(header.command) else { break };

                match command {
                    Command::CmdSubmit => {
                        if !handle_submit(&mut reader, header, &adapter, &in_flight, &egress_tx).await {
                            break;
                        }
                    }
                    Command::CmdUnlink => {
                        if !handle_unlink(&mut reader, header, devid, &in_flight, &egress_tx).await {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        }
    }

    drain(in_flight, egress_tx, egress_handle).await;
    debug!(busid = %entry.busid, "session closed");
}

async fn handle_submit(
    reader: &mut OwnedReadHalf,
    header: UsbIpHeaderBasic,
    adapter: &Arc<DeviceAdapter>,
    in_flight: &Arc<Mutex<HashMap<u32, InFlight>>>,
    egress_tx: &mpsc::UnboundedSender<EgressEvent>,
) -> bool {
    let mut rest = [0u8; 28];
    if reader.read_exact(&mut rest).await.is_err() {
        return false;
    }
    let mut body = Vec::with_capacity(48);
    body.extend_from_slice(&proto::encode(&header));
    body.extend_from_slice(&rest);
    let Some(cmd): Option<CmdSubmit> = proto::decode(&body) else { return false };

    let direction_in = header.direction == proto::USBIP_DIR_IN;
    let ep = header.ep as u8;
    let seqnum = header.seqnum;
    let devid = header.devid;

    let mut out_data = Vec::new();
    if !direction_in && cmd.transfer_buffer_length > 0 {
        out_data = vec![0u8; cmd.transfer_buffer_length as usize];
        if reader.read_exact(&mut out_data).await.is_err() {
            return false;
        }
    }
    // Iso packet descriptors must be drained off the wire to keep the stream
    // framed correctly even though the adapter rejects ISO transfers outright
    // (see `DeviceAdapter::submit_isochronous`).
    if cmd.number_of_packets > 0 && cmd.number_of_packets != 0xffff_ffff {
        let mut iso_descriptors = vec![0u8; cmd.number_of_packets as usize * 16];
        if reader.read_exact(&mut iso_descriptors).await.is_err() {
            return false;
        }
    }

    let setup = if ep == 0 { Some(*cmd.setup.as_bytes()) } else { None };

    let (cancel_tx, cancel_rx) = oneshot::channel();
    {
        let mut guard = in_flight.lock().expect("in-flight map mutex poisoned");
        guard.insert(seqnum, InFlight { ep, cancel_tx });
    }
    let _ = egress_tx.send(EgressEvent::Submitted { ep, seqnum });

    let adapter = Arc::clone(adapter);
    let in_flight = Arc::clone(in_flight);
    let egress_tx = egress_tx.clone();
    let transfer_buffer_length = cmd.transfer_buffer_length;

    tokio::spawn(async move {
        let still_pending = {
            tokio::select! {
                outcome = adapter.submit(ep, direction_in, setup, out_data, transfer_buffer_length) => {
                    Some(outcome)
                }
                _ = cancel_rx => None,
            }
        };

        let removed = in_flight.lock().expect("in-flight map mutex poisoned").remove(&seqnum).is_some();

        match still_pending {
            Some(outcome) if removed => {
                let _ = egress_tx.send(EgressEvent::Completion { seqnum, devid, ep, status: outcome.status, data: outcome.data });
            }
            _ => {
                // Either cancelled (the caller already removed the entry
                // and will emit RET_UNLINK itself) or the entry was already
                // taken by a racing unlink just as this transfer finished.
            }
        }
    });

    true
}

async fn handle_unlink(
    reader: &mut OwnedReadHalf,
    header: UsbIpHeaderBasic,
    devid: u32,
    in_flight: &Arc<Mutex<HashMap<u32, InFlight>>>,
    egress_tx: &mpsc::UnboundedSender<EgressEvent>,
) -> bool {
    let mut rest = [0u8; 28];
    if reader.read_exact(&mut rest).await.is_err() {
        return false;
    }
    let mut body = Vec::with_capacity(48);
    body.extend_from_slice(&proto::encode(&header));
    body.extend_from_slice(&rest);
    let Some(cmd): Option<CmdUnlink> = proto::decode(&body) else { return false };

    let target = in_flight.lock().expect("in-flight map mutex poisoned").remove(&cmd.unlink_seqnum);

    let status = match target {
        Some(in_flight) => {
            let _ = in_flight.cancel_tx.send(());
            let _ = egress_tx.send(EgressEvent::CancelPending { ep: in_flight.ep, seqnum: cmd.unlink_seqnum });
            errno::ECONNRESET
        }
        None => 0,
    };

    let _ = egress_tx.send(EgressEvent::UnlinkReply { devid, unlink_header_seqnum: header.seqnum, status });
    true
}

async fn drain(
    in_flight: Arc<Mutex<HashMap<u32, InFlight>>>,
    egress_tx: mpsc::UnboundedSender<EgressEvent>,
    egress_handle: tokio::task::JoinHandle<()>,
) {
    let stragglers: Vec<_> = in_flight.lock().expect("in-flight map mutex poisoned").drain().collect();
    for (_, in_flight) in stragglers {
        let _ = in_flight.cancel_tx.send(());
    }
    drop(egress_tx);
    let _ = tokio::time::timeout(DRAIN_GRACE, egress_handle).await;
}
