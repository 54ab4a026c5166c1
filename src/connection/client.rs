use std::time::Instant;

use super::{Connection, HandshakeState};
use crate::buffer::Buf;
use crate::crypto::{derive_traffic_secrets, finished_verify_data, verify_finished, TrafficKeys};
use crate::message::{
    append_transcript, Body, ClientHello, Cookie, Finished, HelloVerifyRequest, MessageType,
    ServerHello,
};
use crate::types::ProtocolVersion;
use crate::Error;

impl HandshakeState {
    pub(super) fn client_progress(self, conn: &mut Connection, now: Instant) -> Result<Self, Error> {
        match self {
            HandshakeState::Idle => Ok(HandshakeState::SendingClientHello),
            HandshakeState::SendingClientHello => self.send_client_hello(conn, now),
            HandshakeState::AwaitingHelloVerify => self.await_hello_verify(conn),
            HandshakeState::ResendingClientHelloWithCookie => {
                self.resend_client_hello(conn, now)
            }
            HandshakeState::AwaitingServerHello => self.await_server_hello(conn),
            HandshakeState::Negotiating => self.client_negotiate(conn),
            HandshakeState::AwaitingFinished => self.await_server_finished(conn, now),
            _ => Ok(self),
        }
    }

    fn send_client_hello(self, conn: &mut Connection, now: Instant) -> Result<Self, Error> {
        let client_hello = ClientHello::new(
            conn.random,
            Cookie::empty(),
            conn.key_exchange.key_share(),
        );

        // Cookie retries reuse random and key share, so the transcript is
        // fixed by the first ClientHello.
        let mut body = Buf::new();
        client_hello.serialize_without_cookie(&mut body);
        append_transcript(MessageType::ClientHello, &body, &mut conn.transcript);

        conn.client_hello = Some(client_hello);
        transmit_client_hello(conn, 1, now)?;

        Ok(HandshakeState::AwaitingHelloVerify)
    }

    fn await_hello_verify(self, conn: &mut Connection) -> Result<Self, Error> {
        let accept = [MessageType::HelloVerifyRequest, MessageType::ServerHello];
        let Some((_, body)) = conn.next_handshake(&accept)? else {
            return Ok(self);
        };

        match body {
            Body::HelloVerifyRequest(hvr) => {
                accept_cookie_request(conn, hvr)?;
                Ok(HandshakeState::ResendingClientHelloWithCookie)
            }
            Body::ServerHello(sh) => {
                debug!("Server did not ask for a cookie");
                accept_server_hello(conn, sh)?;
                Ok(HandshakeState::Negotiating)
            }
            _ => Ok(self),
        }
    }

    fn resend_client_hello(self, conn: &mut Connection, now: Instant) -> Result<Self, Error> {
        transmit_client_hello(conn, 3, now)?;
        Ok(HandshakeState::AwaitingServerHello)
    }

    fn await_server_hello(self, conn: &mut Connection) -> Result<Self, Error> {
        // A second HelloVerifyRequest means the cookie secret rotated.
        let accept = [MessageType::ServerHello, MessageType::HelloVerifyRequest];
        let Some((_, body)) = conn.next_handshake(&accept)? else {
            return Ok(self);
        };

        match body {
            Body::ServerHello(sh) => {
                accept_server_hello(conn, sh)?;
                Ok(HandshakeState::Negotiating)
            }
            Body::HelloVerifyRequest(hvr) => {
                accept_cookie_request(conn, hvr)?;
                Ok(HandshakeState::ResendingClientHelloWithCookie)
            }
            _ => Ok(self),
        }
    }

    fn client_negotiate(self, conn: &mut Connection) -> Result<Self, Error> {
        let Some(server_hello) = &conn.server_hello else {
            return Err(Error::UnexpectedMessage(
                "Negotiating without ServerHello".to_string(),
            ));
        };

        let shared = conn.key_exchange.shared_secret(&server_hello.key_share)?;
        let secrets = derive_traffic_secrets(conn.config.psk(), &shared, &conn.transcript)?;

        conn.record
            .install_send_keys(TrafficKeys::from_secret(secrets.client.clone())?)?;
        let deferred = conn
            .record
            .install_recv_keys(TrafficKeys::from_secret(secrets.server.clone())?)?;
        conn.redecode.extend(deferred);
        conn.secrets = Some(secrets);

        Ok(HandshakeState::AwaitingFinished)
    }

    fn await_server_finished(self, conn: &mut Connection, now: Instant) -> Result<Self, Error> {
        let Some((_, body)) = conn.next_handshake(&[MessageType::Finished])? else {
            return Ok(self);
        };
        let Body::Finished(finished) = body else {
            return Ok(self);
        };

        let Some(secrets) = &conn.secrets else {
            return Err(Error::UnexpectedMessage(
                "Finished before key derivation".to_string(),
            ));
        };

        let expected = finished_verify_data(&secrets.server, &conn.transcript)?;
        if !verify_finished(&expected, &finished.verify_data) {
            return Err(Error::SecurityError(
                "Server Finished verification failed".to_string(),
            ));
        }

        let mut body = Buf::new();
        finished.serialize(&mut body);
        append_transcript(MessageType::Finished, &body, &mut conn.transcript);

        let verify_data = finished_verify_data(&secrets.client, &conn.transcript)?;
        let mut body = Buf::new();
        Finished::new(verify_data).serialize(&mut body);

        // The last flight has no timer, the server's retransmission of
        // its flight is what triggers a resend.
        conn.begin_flight(5, now, false);
        conn.send_handshake(MessageType::Finished, &body)?;

        conn.establish(now);
        Ok(HandshakeState::Established)
    }
}

/// Queue the ClientHello with the current cookie as a new flight.
fn transmit_client_hello(conn: &mut Connection, flight: u8, now: Instant) -> Result<(), Error> {
    let Some(client_hello) = &conn.client_hello else {
        return Err(Error::UnexpectedMessage("No ClientHello to send".to_string()));
    };

    let mut body = Buf::new();
    client_hello.serialize(&mut body);

    conn.recv_message_seq = Some(conn.send_message_seq);
    conn.begin_flight(flight, now, true);
    conn.send_handshake(MessageType::ClientHello, &body)
}

fn accept_cookie_request(conn: &mut Connection, hvr: HelloVerifyRequest) -> Result<(), Error> {
    if hvr.server_version != ProtocolVersion::V1 {
        return Err(Error::SecurityError(format!(
            "Unsupported version in HelloVerifyRequest: {}",
            hvr.server_version
        )));
    }

    conn.cookie_requests += 1;
    let allowed = 1 + conn.config.cookie_retry_tolerance();
    if conn.cookie_requests > allowed {
        return Err(Error::CookieAbuse(conn.cookie_requests));
    }

    debug!(
        "Cookie request {} of {} allowed",
        conn.cookie_requests, allowed
    );

    let Some(client_hello) = &mut conn.client_hello else {
        return Err(Error::UnexpectedMessage(
            "HelloVerifyRequest before ClientHello".to_string(),
        ));
    };
    client_hello.cookie = hvr.cookie;

    Ok(())
}

fn accept_server_hello(conn: &mut Connection, server_hello: ServerHello) -> Result<(), Error> {
    if server_hello.server_version != ProtocolVersion::V1 {
        return Err(Error::SecurityError(format!(
            "Unsupported version in ServerHello: {}",
            server_hello.server_version
        )));
    }

    // The ClientHello is answered; the next flight is our Finished.
    conn.flight.clear();

    let mut body = Buf::new();
    server_hello.serialize(&mut body);
    append_transcript(MessageType::ServerHello, &body, &mut conn.transcript);
    conn.server_hello = Some(server_hello);

    Ok(())
}
