use std::time::Instant;

use super::{Connection, HandshakeState};
use crate::buffer::Buf;
use crate::crypto::{derive_traffic_secrets, finished_verify_data, verify_finished, TrafficKeys};
use crate::message::{append_transcript, Body, Finished, MessageType, ServerHello};
use crate::types::ProtocolVersion;
use crate::Error;

impl HandshakeState {
    pub(super) fn server_progress(self, conn: &mut Connection, now: Instant) -> Result<Self, Error> {
        match self {
            HandshakeState::Idle => Ok(HandshakeState::AwaitingClientHello),
            HandshakeState::AwaitingClientHello => self.await_client_hello(conn),
            HandshakeState::Negotiating => self.server_negotiate(conn, now),
            HandshakeState::AwaitingFinished => self.await_client_finished(conn, now),
            _ => Ok(self),
        }
    }

    fn await_client_hello(self, conn: &mut Connection) -> Result<Self, Error> {
        let Some((message_seq, body)) = conn.next_handshake(&[MessageType::ClientHello])? else {
            return Ok(self);
        };
        let Body::ClientHello(client_hello) = body else {
            return Ok(self);
        };

        if client_hello.client_version != ProtocolVersion::V1 {
            return Err(Error::SecurityError(format!(
                "Unsupported version in ClientHello: {}",
                client_hello.client_version
            )));
        }

        // Our first message answers the ClientHello's sequence number.
        conn.send_message_seq = message_seq;

        let mut body = Buf::new();
        client_hello.serialize_without_cookie(&mut body);
        append_transcript(MessageType::ClientHello, &body, &mut conn.transcript);
        conn.client_hello = Some(client_hello);

        Ok(HandshakeState::Negotiating)
    }

    fn server_negotiate(self, conn: &mut Connection, now: Instant) -> Result<Self, Error> {
        let Some(client_hello) = &conn.client_hello else {
            return Err(Error::UnexpectedMessage(
                "Negotiating without ClientHello".to_string(),
            ));
        };

        let shared = conn.key_exchange.shared_secret(&client_hello.key_share)?;
        let server_hello = ServerHello::new(conn.random, conn.key_exchange.key_share());

        conn.begin_flight(4, now, true);

        let mut body = Buf::new();
        server_hello.serialize(&mut body);
        conn.send_handshake(MessageType::ServerHello, &body)?;
        append_transcript(MessageType::ServerHello, &body, &mut conn.transcript);
        conn.server_hello = Some(server_hello);

        let secrets = derive_traffic_secrets(conn.config.psk(), &shared, &conn.transcript)?;
        conn.record
            .install_send_keys(TrafficKeys::from_secret(secrets.server.clone())?)?;
        let deferred = conn
            .record
            .install_recv_keys(TrafficKeys::from_secret(secrets.client.clone())?)?;
        conn.redecode.extend(deferred);

        let verify_data = finished_verify_data(&secrets.server, &conn.transcript)?;
        let mut body = Buf::new();
        Finished::new(verify_data).serialize(&mut body);
        conn.send_handshake(MessageType::Finished, &body)?;
        append_transcript(MessageType::Finished, &body, &mut conn.transcript);

        conn.secrets = Some(secrets);

        Ok(HandshakeState::AwaitingFinished)
    }

    fn await_client_finished(self, conn: &mut Connection, now: Instant) -> Result<Self, Error> {
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

        let expected = finished_verify_data(&secrets.client, &conn.transcript)?;
        if !verify_finished(&expected, &finished.verify_data) {
            return Err(Error::SecurityError(
                "Client Finished verification failed".to_string(),
            ));
        }

        // Nothing left to retransmit once the client has finished.
        conn.flight.clear();
        conn.establish(now);

        Ok(HandshakeState::Established)
    }
}
