//! Offer/answer creation and the connection each side ends up with.

use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

use fileflow_protocol::PROTOCOL_VERSION;

use crate::code::generate_connection_code;
use crate::description::{Candidate, DescriptionKind, SessionDescription};
use crate::error::SignalingError;
use crate::gather::gather_candidates;
use crate::handshake::{
    generate_token, read_token, read_verdict, validate_token, write_token, write_verdict,
};
use crate::{ANSWER_TIMEOUT, AUTH_TIMEOUT, CONNECT_TIMEOUT, GATHER_TIMEOUT};

/// Knobs for one signaling exchange.
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    pub gather_timeout: Duration,
    pub connect_timeout: Duration,
    pub answer_timeout: Duration,
    /// Advertise 127.0.0.1 first. Needed when both peers share a machine.
    pub include_loopback: bool,
    /// Port the offering side listens on; 0 picks an ephemeral port.
    pub listen_port: u16,
    pub device_name: Option<String>,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            gather_timeout: GATHER_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            answer_timeout: ANSWER_TIMEOUT,
            include_loopback: false,
            listen_port: 0,
            device_name: None,
        }
    }
}

/// Produces and consumes session description blobs.
#[derive(Debug, Clone, Default)]
pub struct SignalingCodec {
    config: SignalingConfig,
}

impl SignalingCodec {
    pub fn new(config: SignalingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalingConfig {
        &self.config
    }

    /// Binds the listener, gathers candidates and returns the offer blob.
    ///
    /// A gather that times out still produces a valid offer from the
    /// candidates found so far.
    pub async fn create_offer(&self) -> Result<(PendingOffer, String), SignalingError> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.listen_port)).await?;
        let port = listener.local_addr()?.port();

        let gathered =
            gather_candidates(port, self.config.include_loopback, self.config.gather_timeout)
                .await;
        let mut candidates = gathered.candidates;
        if candidates.is_empty() {
            warn!("no LAN address found, advertising loopback only");
            candidates.push(Candidate {
                ip: std::net::Ipv4Addr::LOCALHOST.into(),
                port,
            });
        }

        let description = SessionDescription {
            kind: DescriptionKind::Offer,
            session_id: generate_connection_code(),
            token: None,
            candidates,
            gathering_complete: gathered.complete,
            protocol_version: PROTOCOL_VERSION,
            device_name: self.config.device_name.clone(),
        };
        let blob = description.to_blob()?;

        info!(
            session = %description.session_id,
            port,
            candidates = description.candidates.len(),
            complete = description.gathering_complete,
            "offer created"
        );

        Ok((
            PendingOffer {
                listener,
                description,
                connect_timeout: self.config.connect_timeout,
            },
            blob,
        ))
    }

    /// Parses an offer blob and returns the answer blob.
    ///
    /// Nothing is dialed yet; call [`PendingAnswer::connect`] once the answer
    /// is on its way to the offering peer.
    pub async fn create_answer(
        &self,
        remote_blob: &str,
    ) -> Result<(PendingAnswer, String), SignalingError> {
        let offer = SessionDescription::from_blob_expecting(remote_blob, DescriptionKind::Offer)?;

        let gathered =
            gather_candidates(0, self.config.include_loopback, self.config.gather_timeout).await;
        let token = generate_token();

        let description = SessionDescription {
            kind: DescriptionKind::Answer,
            session_id: offer.session_id.clone(),
            token: Some(token.clone()),
            candidates: gathered.candidates,
            gathering_complete: gathered.complete,
            protocol_version: PROTOCOL_VERSION,
            device_name: self.config.device_name.clone(),
        };
        let blob = description.to_blob()?;

        info!(
            session = %offer.session_id,
            remote = offer.device_name.as_deref().unwrap_or("unknown"),
            "answer created"
        );

        Ok((
            PendingAnswer {
                offer,
                token,
                connect_timeout: self.config.connect_timeout,
                answer_timeout: self.config.answer_timeout,
            },
            blob,
        ))
    }
}

/// Offering side between publishing the offer and admitting the peer.
#[derive(Debug)]
pub struct PendingOffer {
    listener: TcpListener,
    description: SessionDescription,
    connect_timeout: Duration,
}

impl PendingOffer {
    pub fn description(&self) -> &SessionDescription {
        &self.description
    }

    /// The session's connection code.
    pub fn session_id(&self) -> &str {
        &self.description.session_id
    }

    pub fn local_port(&self) -> u16 {
        self.description.candidates.first().map_or(0, |c| c.port)
    }

    /// Validates the answer and admits the peer presenting its token.
    ///
    /// Connections with a wrong or missing token are rejected and the
    /// listener keeps waiting until `connect_timeout` runs out.
    pub async fn accept_answer(self, answer_blob: &str) -> Result<TcpStream, SignalingError> {
        let answer = SessionDescription::from_blob_expecting(answer_blob, DescriptionKind::Answer)?;
        if answer.session_id != self.description.session_id {
            return Err(SignalingError::SessionMismatch {
                expected: self.description.session_id.clone(),
                actual: answer.session_id,
            });
        }
        let expected = answer
            .token
            .ok_or_else(|| SignalingError::Malformed("answer without token".into()))?;

        let deadline = Instant::now() + self.connect_timeout;
        loop {
            let (mut stream, addr) = match timeout_at(deadline, self.listener.accept()).await {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(SignalingError::Timeout),
            };
            debug!(%addr, "connection attempt");

            let presented = match timeout(AUTH_TIMEOUT, read_token(&mut stream)).await {
                Ok(Ok(token)) => token,
                Ok(Err(e)) => {
                    warn!(%addr, error = %e, "handshake failed");
                    continue;
                }
                Err(_) => {
                    warn!(%addr, "handshake timed out");
                    continue;
                }
            };

            if !validate_token(&presented, &expected) {
                warn!(%addr, "rejected connection with invalid token");
                let _ = write_verdict(&mut stream, false).await;
                continue;
            }

            write_verdict(&mut stream, true).await?;
            stream.set_nodelay(true)?;
            info!(%addr, session = %self.description.session_id, "peer admitted");
            return Ok(stream);
        }
    }
}

/// Answering side between publishing the answer and being admitted.
#[derive(Debug)]
pub struct PendingAnswer {
    offer: SessionDescription,
    token: String,
    connect_timeout: Duration,
    answer_timeout: Duration,
}

impl PendingAnswer {
    /// The offer this answer responds to.
    pub fn offer(&self) -> &SessionDescription {
        &self.offer
    }

    pub fn session_id(&self) -> &str {
        &self.offer.session_id
    }

    /// Dials the offer's candidates in order and authenticates.
    ///
    /// Waits up to `answer_timeout` for the offering side to take the answer
    /// and admit us.
    pub async fn connect(self) -> Result<TcpStream, SignalingError> {
        let mut stream = None;
        for candidate in &self.offer.candidates {
            let addr = candidate.addr();
            match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(s)) => {
                    debug!(%addr, "candidate reachable");
                    stream = Some(s);
                    break;
                }
                Ok(Err(e)) => debug!(%addr, error = %e, "candidate unreachable"),
                Err(_) => debug!(%addr, "candidate timed out"),
            }
        }
        let mut stream = stream.ok_or(SignalingError::Unreachable)?;
        stream.set_nodelay(true)?;

        write_token(&mut stream, &self.token).await?;
        let accepted = timeout(self.answer_timeout, read_verdict(&mut stream))
            .await
            .map_err(|_| SignalingError::Timeout)??;
        if !accepted {
            return Err(SignalingError::AuthRejected);
        }

        info!(session = %self.offer.session_id, "admitted by offering peer");
        Ok(stream)
    }
}
