//! Receiver worker task

use super::{Answer, PendingTransfer, ReceiverState, Shared};
use crate::error::{EngineError, Result};
use crate::protocol::{self, Decision, Frame, Handshake, Verdict, timed};
use lanshare_files::{FileChunker, PayloadSink};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};

/// How one connection ended
enum Served {
    /// Back to listening for the next sender
    Listen,
    /// Reached a terminal state; the worker exits
    Finished,
    /// Shutdown was signalled
    Shutdown,
}

/// Accept connections until a transfer finishes or shutdown is signalled
pub(crate) async fn run(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => return,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        tracing::debug!(peer = %peer, "connection accepted");

        match serve(stream, peer, &shared, &mut shutdown).await {
            Served::Listen => continue,
            Served::Finished | Served::Shutdown => return,
        }
    }
}

/// Race `fut` against shutdown; `None` means shutdown won
async fn or_shutdown<T, F>(shutdown: &mut watch::Receiver<bool>, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        _ = shutdown.changed() => None,
        value = fut => Some(value),
    }
}

async fn serve(
    mut stream: TcpStream,
    peer: SocketAddr,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> Served {
    let io_timeout = shared.config.io_timeout;

    let handshake = match or_shutdown(
        shutdown,
        timed(io_timeout, "handshake read", Handshake::read_from(&mut stream)),
    )
    .await
    {
        None => return Served::Shutdown,
        Some(Ok(handshake)) => handshake,
        Some(Err(e)) => {
            tracing::warn!(peer = %peer, error = %e, "dropped connection without a valid handshake");
            return Served::Listen;
        }
    };

    tracing::info!(
        peer = %peer,
        sender = %handshake.sender_name,
        file = %handshake.file_name,
        bytes = handshake.file_size,
        folder = handshake.is_folder,
        "incoming transfer offer"
    );

    let (decide, decision) = oneshot::channel();
    shared.offer(
        PendingTransfer {
            sender_name: handshake.sender_name.clone(),
            sender_addr: peer,
            file_name: handshake.file_name.clone(),
            file_size: handshake.file_size,
            is_folder: handshake.is_folder,
        },
        decide,
    );

    let answer = match await_decision(&mut stream, decision, shared, shutdown).await {
        Some(answer) => answer,
        None if shared.state() == ReceiverState::Listening => return Served::Listen,
        None => return Served::Shutdown,
    };

    let sink = match answer {
        Answer::Reject => {
            if let Err(e) = timed(
                io_timeout,
                "reject write",
                protocol::write_control(&mut stream, Decision::Reject.to_byte()),
            )
            .await
            {
                tracing::debug!(peer = %peer, error = %e, "reject not delivered");
            }
            return Served::Listen;
        }
        Answer::Accept(sink) => sink,
    };

    match or_shutdown(shutdown, receive(&mut stream, sink, &handshake, shared)).await {
        None => {
            tracing::info!(peer = %peer, "transfer abandoned by stop");
            Served::Shutdown
        }
        Some(Ok(())) => Served::Finished,
        Some(Err(e)) => {
            tracing::error!(peer = %peer, file = %handshake.file_name, error = %e, "transfer failed");
            shared.fail(e);
            Served::Finished
        }
    }
}

/// Wait for `accept`/`reject` while watching the connection
///
/// Returns `None` if the sender went away before a decision (the offer is
/// withdrawn and the state is back to `Listening`) or on shutdown.
async fn await_decision(
    stream: &mut TcpStream,
    mut decision: oneshot::Receiver<Answer>,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<Answer> {
    let mut peek = [0u8; 1];

    tokio::select! {
        _ = shutdown.changed() => None,
        answer = &mut decision => answer.ok(),
        read = stream.read(&mut peek) => {
            // A well-behaved sender is silent until it gets a decision
            match read {
                Ok(0) => tracing::info!("sender disconnected before a decision"),
                Ok(_) => tracing::warn!("sender spoke before a decision; dropping"),
                Err(e) => tracing::info!(error = %e, "sender connection lost before a decision"),
            }
            if shared.withdraw() {
                None
            } else {
                // accept/reject claimed the slot first; honor it
                decision.await.ok()
            }
        }
    }
}

/// Position the sink, send the accept byte and resume point, then take the
/// payload through to a verdict
async fn receive(
    stream: &mut TcpStream,
    mut sink: PayloadSink,
    handshake: &Handshake,
    shared: &Shared,
) -> Result<()> {
    let io_timeout = shared.config.io_timeout;
    let total = handshake.file_size;
    let max_frame = handshake.chunk_size as usize;
    let chunker = FileChunker::with_chunk_size(max_frame)
        .ok_or_else(|| EngineError::protocol("chunk size out of range"))?;

    let (first_chunk, mut checksum) = sink.resume(&chunker, total).await?;
    let mut received = sink.written();
    shared.bytes_received.store(received, Ordering::Release);
    if first_chunk > 0 {
        tracing::info!(
            file = %handshake.file_name,
            offset = received,
            chunk = first_chunk,
            "resuming transfer into partial file"
        );
    }

    timed(
        io_timeout,
        "accept write",
        protocol::write_control(stream, Decision::Accept.to_byte()),
    )
    .await?;
    timed(
        io_timeout,
        "resume point write",
        protocol::write_resume(stream, first_chunk),
    )
    .await?;

    let mut buf = Vec::with_capacity(max_frame);

    let expected = loop {
        let frame = timed(io_timeout, "data frame read", protocol::read_frame(stream, max_frame, &mut buf))
            .await?;
        match frame {
            Frame::Data => {
                if received + buf.len() as u64 > total {
                    return Err(EngineError::protocol("sender exceeded the announced size"));
                }
                sink.write_chunk(&buf).await?;
                checksum.update(&buf);
                received += buf.len() as u64;
                shared.bytes_received.store(received, Ordering::Release);
            }
            Frame::End(digest) => break digest,
            Frame::Cancel => return Err(EngineError::Cancelled),
        }
    };

    let actual = checksum.finalize();
    shared.set_checksum(actual.to_hex());

    if received != total || actual != expected {
        tracing::warn!(
            expected = %expected,
            actual = %actual,
            received,
            total,
            "integrity check failed"
        );
        let _ = timed(
            io_timeout,
            "verdict write",
            protocol::write_control(stream, Verdict::Mismatch.to_byte()),
        )
        .await;
        return Err(EngineError::HashMismatch);
    }

    let saved = match sink.finish().await {
        Ok(path) => path,
        Err(e) => {
            let _ = timed(
                io_timeout,
                "verdict write",
                protocol::write_control(stream, Verdict::Mismatch.to_byte()),
            )
            .await;
            return Err(e.into());
        }
    };

    timed(
        io_timeout,
        "verdict write",
        protocol::write_control(stream, Verdict::Verified.to_byte()),
    )
    .await?;

    tracing::info!(
        file = %handshake.file_name,
        path = %saved.display(),
        bytes = received,
        checksum = %actual,
        "transfer completed"
    );
    shared.complete(saved);
    Ok(())
}
