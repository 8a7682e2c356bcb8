//! The link supervisor (C5): the process-lifetime struct and its four
//! concurrent workers.
//!
//! Grounded in `client::relay::RelayClient::run`'s pattern of multiplexing
//! a socket read against channel receivers with `tokio::select!` inside a
//! task the caller awaits to completion, and in
//! `original_source/pkg/link.go`/`link_native.go`, whose `Connect()` spawns
//! `errorHandler`, `httpToTun`, and `tunToHttp` as goroutines funneling into
//! a single `errChan`, with `waitAndConfig`/`restoreConfig` bracketing them.
//!
//! Unlike the original, which creates the TUN device immediately and
//! readdresses it after negotiation completes (`water.New` then a later
//! `netlink.AddrAdd`), this crate creates the TUN device only once IPCP has
//! handed back a local/remote address pair, since the `tun` crate expects
//! addressing at creation time. PPP negotiation therefore runs inline
//! before the data-plane workers are spawned, rather than interleaved with
//! them from the start — documented as an intentional deviation in
//! DESIGN.md, not a behavior change to the wire protocol itself.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::codec::Frame;
use crate::config::Config;
use crate::error::TunnelError;
use crate::ppp::{Negotiator, PppEvent};
use crate::resolv::{self, ResolverBackend, ResolverSettings};
use crate::route::{self, AppliedRoutes};
use crate::session::SessionInfo;
use crate::transport::{self, DialParams, Transport, TransportReader, TransportWriter};
use crate::tun::{TunAddressing, TunDevice};

const ERR_CHAN_CAPACITY: usize = 1;
const TUN_CHANNEL_CAPACITY: usize = 256;

/// Runs one VPN session end to end: dial, negotiate PPP, bring up the TUN
/// device, configure routes and DNS, relay traffic until a worker reports
/// an error or the process receives a termination signal, then tear
/// everything down in reverse order. Returns once torn down.
pub async fn connect(config: Config, session: SessionInfo, server_ips: Vec<Ipv4Addr>) -> Result<(), TunnelError> {
    let dial_params = DialParams {
        server: session.server.clone(),
        session_id: session.session_id.clone(),
        ur_z: session.ur_z.clone(),
        hdlc_framing: true,
        ipv4: true,
        ipv6: config.ipv6,
        insecure_tls: config.insecure_tls,
        ca_cert: config.ca_cert.clone(),
        renegotiation: config.renegotiation,
        use_dtls: config.dtls && session.dtls_allowed,
        dtls_port: session.dtls_port.unwrap_or(4433),
    };
    let (mut transport, _endpoints) = transport::dial(&dial_params).await?;

    let mut negotiator = Negotiator::new(config.ipv6);
    let (local_ipv4, remote_ipv4) = negotiate_ipv4(&mut *transport, &mut negotiator).await?;
    tracing::info!(%local_ipv4, %remote_ipv4, "IPCP negotiation complete");

    let tun = TunDevice::create(&TunAddressing { local_ipv4, peer_ipv4: remote_ipv4, mtu: negotiator.mtu })?;
    let tun_name = tun.name().to_string();
    tracing::info!(tun_name, "created tunnel interface");

    // Linux uses the local address as the gateway for custom routes; other
    // platforms route through the server's address, per
    // `original_source/pkg/link.go::waitAndConfig`.
    let peer_gateway = if cfg!(target_os = "linux") { local_ipv4 } else { remote_ipv4 };

    let applied_routes = route::apply(&tun_name, &server_ips, peer_gateway, &session.exclude_subnets, &config.routes)?;

    let resolver: Option<Box<dyn ResolverBackend>> = if config.disable_dns {
        None
    } else {
        let servers: Vec<Ipv4Addr> = if config.dns.is_empty() { session.dns_servers.clone() } else { config.dns.clone() };
        let suffix = config.override_dns_suffix.clone().or_else(|| session.dns_suffix.clone());
        Some(
            resolv::configure(&ResolverSettings { tun_name: &tun_name, servers: &servers, search_suffix: suffix.as_deref() })
                .await?,
        )
    };

    let (result, data_plane) = run_data_plane(transport, tun, negotiator).await;

    // Teardown order mirrors bring-up in reverse: DNS restore, then route
    // withdrawal, and only then do we stop the data-plane workers, which is
    // what actually closes the TUN device and the transport (`shut_down`
    // aborts and joins every worker task before explicitly closing the
    // transport, so the TUN/transport close happens strictly after this).
    if let Some(resolver) = &resolver {
        if let Err(e) = resolver.restore().await {
            tracing::warn!("failed to restore resolver configuration: {e}");
        }
    }
    route::restore(&applied_routes);

    data_plane.shut_down().await;

    match result {
        Err(TunnelError::SignalExit) => Ok(()),
        other => other,
    }
}

/// Reads and negotiates LCP/IPCP (and IPv6CP, inline, if enabled) until
/// IPCP converges, returning the local/remote IPv4 pair. Runs before any
/// data-plane worker exists, since incoming traffic before this point can
/// only be PPP control traffic.
async fn negotiate_ipv4(transport: &mut dyn Transport, negotiator: &mut Negotiator) -> Result<(Ipv4Addr, Ipv4Addr), TunnelError> {
    loop {
        let frame = transport.read_frame().await?;
        let Frame::Ppp(payload) = frame else {
            continue;
        };
        let outcome = negotiator.handle(&payload)?;
        for reply in &outcome.to_send {
            transport.write_frame(reply).await?;
        }
        for event in outcome.events {
            match event {
                PppEvent::Ipv4Up { local, remote } => return Ok((local, remote)),
                PppEvent::Ipv6Up { .. } => {}
                PppEvent::Terminated { id, reason_code } => {
                    return Err(TunnelError::PppNegotiationFailed {
                        id,
                        reason: format!("peer sent LCP Terminate-Request, reason code 0x{reason_code:04x}").into(),
                    })
                }
            }
        }
    }
}

/// Handles to every spawned data-plane worker plus the shared transport
/// writer, returned by `run_data_plane` instead of being torn down
/// internally. The supervisor in `connect` only calls `shut_down` after DNS
/// and route teardown have completed, so the TUN device and transport (both
/// closed as a side effect of stopping these workers) go down last, per the
/// bring-up-in-reverse teardown order.
struct DataPlane {
    negotiator_task: JoinHandle<()>,
    transport_to_tun_task: JoinHandle<()>,
    tun_to_transport_task: JoinHandle<()>,
    signal_task: JoinHandle<()>,
    transport_writer: Arc<Mutex<Box<dyn TransportWriter>>>,
}

impl DataPlane {
    async fn shut_down(self) {
        self.negotiator_task.abort();
        self.transport_to_tun_task.abort();
        self.tun_to_transport_task.abort();
        self.signal_task.abort();
        // Join before closing so the TUN reader/writer halves (owned by the
        // aborted tasks) have actually been dropped, closing the TUN
        // device, before the explicit transport close below runs.
        let _ = tokio::join!(
            self.negotiator_task,
            self.transport_to_tun_task,
            self.tun_to_transport_task,
            self.signal_task
        );
        self.transport_writer.lock().await.close().await;
    }
}

/// Spawns the four data-plane workers and blocks until one of them reports
/// a fatal error (first-error-wins over a bounded `err_chan`), then returns
/// control to the caller without tearing anything down yet — see
/// [`DataPlane::shut_down`].
async fn run_data_plane(transport: Box<dyn Transport>, tun: TunDevice, negotiator: Negotiator) -> (Result<(), TunnelError>, DataPlane) {
    let (transport_reader, transport_writer) = transport.split();
    let transport_writer = Arc::new(Mutex::new(transport_writer));
    let (tun_reader, tun_writer) = tun.split();

    let (err_tx, mut err_rx) = mpsc::channel::<TunnelError>(ERR_CHAN_CAPACITY);
    let (tun_write_tx, tun_write_rx) = mpsc::channel::<Vec<u8>>(TUN_CHANNEL_CAPACITY);
    let (tun_read_tx, mut tun_read_rx) = mpsc::channel::<Frame>(TUN_CHANNEL_CAPACITY);

    let negotiator_task = {
        let transport_writer = transport_writer.clone();
        let err_tx = err_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = negotiator_worker(transport_reader, transport_writer, negotiator, tun_write_tx).await {
                let _ = err_tx.try_send(e);
            }
        })
    };

    let transport_to_tun_task = {
        let err_tx = err_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = transport_to_tun_worker(tun_writer, tun_write_rx).await {
                let _ = err_tx.try_send(e);
            }
        })
    };

    let tun_to_transport_task = {
        let err_tx = err_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tun_to_transport_worker(tun_reader, tun_read_tx).await {
                let _ = err_tx.try_send(e);
            }
        })
    };

    let signal_task = {
        let err_tx = err_tx.clone();
        tokio::spawn(async move {
            wait_for_termination_signal().await;
            let _ = err_tx.try_send(TunnelError::SignalExit);
        })
    };

    // The fourth worker role, "forward traffic read back from the tun
    // device out over the transport", runs here on the task driving
    // `connect` rather than as its own spawn. Because the transport's read
    // half is owned exclusively by `negotiator_task` and never touches this
    // lock, this write and any PPP-reply write from `negotiator_worker` are
    // the only contenders for `transport_writer`, so neither can starve the
    // other the way a read/write-shared lock would.
    //
    // This must be a loop, not a single select: one inbound frame from
    // `tun_read_rx` must not end the data plane on its own, only an error
    // or termination signal does.
    let result = loop {
        tokio::select! {
            Some(frame) = tun_read_rx.recv() => {
                let mut guard = transport_writer.lock().await;
                if let Err(e) = guard.write_frame(&frame).await {
                    break Err(e);
                }
            }
            Some(err) = err_rx.recv() => break Err(err),
            else => break Err(TunnelError::PppNegotiationFailed { id: 0, reason: "data plane channels closed unexpectedly".into() }),
        }
    };

    let data_plane = DataPlane { negotiator_task, transport_to_tun_task, tun_to_transport_task, signal_task, transport_writer };
    (result, data_plane)
}

async fn negotiator_worker(
    mut transport_reader: Box<dyn TransportReader>,
    transport_writer: Arc<Mutex<Box<dyn TransportWriter>>>,
    mut negotiator: Negotiator,
    tun_write_tx: mpsc::Sender<Vec<u8>>,
) -> Result<(), TunnelError> {
    loop {
        let frame = transport_reader.read_frame().await?;
        match frame {
            Frame::Ipv4(payload) | Frame::Ipv6(payload) => {
                let _ = tun_write_tx.send(payload.to_vec()).await;
            }
            Frame::Ppp(payload) => {
                let outcome = negotiator.handle(&payload)?;
                for reply in &outcome.to_send {
                    transport_writer.lock().await.write_frame(reply).await?;
                }
                for event in outcome.events {
                    if let PppEvent::Terminated { id, reason_code } = event {
                        return Err(TunnelError::PppNegotiationFailed {
                            id,
                            reason: format!("peer sent LCP Terminate-Request, reason code 0x{reason_code:04x}").into(),
                        });
                    }
                }
            }
        }
    }
}

async fn transport_to_tun_worker(mut tun_writer: crate::tun::TunWriter, mut rx: mpsc::Receiver<Vec<u8>>) -> Result<(), TunnelError> {
    while let Some(packet) = rx.recv().await {
        tun_writer.write_packet(&packet).await?;
    }
    Ok(())
}

async fn tun_to_transport_worker(mut tun_reader: crate::tun::TunReader, tx: mpsc::Sender<Frame>) -> Result<(), TunnelError> {
    let mut buf = vec![0u8; 2048];
    loop {
        let n = tun_reader.read_packet(&mut buf).await?;
        let packet = bytes::Bytes::copy_from_slice(&buf[..n]);
        let frame = match packet.first().map(|b| b >> 4) {
            Some(4) => Frame::Ipv4(packet),
            Some(6) => Frame::Ipv6(packet),
            _ => continue,
        };
        if tx.send(frame).await.is_err() {
            return Ok(());
        }
    }
}

#[cfg(unix)]
async fn wait_for_termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Pin routes plus tunneled route set the link applies before data starts
/// flowing; re-exported here so callers of `connect` outside this module
/// (tests, the CLI) can refer to it without reaching into `crate::route`.
pub type Routes = AppliedRoutes;
