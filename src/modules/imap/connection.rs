// Copyright (c) 2025 Mailsync Engine Contributors
//
// This file is part of the Mailsync Engine project.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Single-connection IMAP session setup (spec.md 4.1 step 1): one
//! authenticated TLS connection per sync cycle, no pooling, with an
//! explicit timeout at each stage of the handshake. Every error raised
//! here carries the `ErrorCode` the coordinator uses to sort it into the
//! fatal/transient/per-message taxonomy (spec.md 7) — an authentication
//! failure and a connect timeout both surface as `EngineError`, but under
//! different codes.

use std::sync::Arc;
use std::time::Duration;

use async_imap::Client;
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::modules::error::code::ErrorCode;
use crate::modules::error::EngineResult;
use crate::modules::model::ImapConfig;
use crate::modules::settings::cli::SETTINGS;
use crate::raise_error;

pub type ImapSession = async_imap::Session<TlsStream<TcpStream>>;

/// Connects, upgrades to TLS, reads the greeting and authenticates,
/// applying the connect/greeting/socket timeouts from [`SETTINGS`]
/// (spec.md 6.2).
pub async fn connect(config: &ImapConfig, password: &str) -> EngineResult<ImapSession> {
    let connect_timeout = Duration::from_secs(SETTINGS.engine_connect_timeout_secs);
    let greeting_timeout = Duration::from_secs(SETTINGS.engine_greeting_timeout_secs);
    let socket_timeout = Duration::from_secs(SETTINGS.engine_socket_timeout_secs);

    let addr = format!("{}:{}", config.host, config.port);
    let tcp = timeout(connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| {
            raise_error!(
                format!("TCP connect to {addr} timed out after {connect_timeout:?}"),
                ErrorCode::ImapConnectTimeout
            )
        })?
        .map_err(|e| {
            raise_error!(
                format!("TCP connect to {addr} failed: {e}"),
                ErrorCode::ImapConnectTimeout
            )
        })?;

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(config.host.clone()).map_err(|_| {
        raise_error!(
            format!("invalid IMAP host name: {}", config.host),
            ErrorCode::InvalidParameter
        )
    })?;

    let tls_stream = timeout(connect_timeout, connector.connect(server_name, tcp))
        .await
        .map_err(|_| {
            raise_error!(
                format!("TLS handshake with {addr} timed out after {connect_timeout:?}"),
                ErrorCode::ImapConnectTimeout
            )
        })?
        .map_err(|e| {
            raise_error!(
                format!("TLS handshake with {addr} failed: {e}"),
                ErrorCode::ImapConnectTimeout
            )
        })?;

    let client = timeout(greeting_timeout, async {
        Client::new(tls_stream).read_greeting().await.map(|(_, c)| c)
    })
    .await
    .map_err(|_| {
        raise_error!(
            format!("IMAP greeting from {addr} timed out after {greeting_timeout:?}"),
            ErrorCode::ImapGreetingTimeout
        )
    })?
    .map_err(|e| {
        raise_error!(
            format!("reading IMAP greeting from {addr} failed: {e:?}"),
            ErrorCode::ImapGreetingTimeout
        )
    })?;

    let session = timeout(socket_timeout, client.login(&config.username, password))
        .await
        .map_err(|_| {
            raise_error!(
                format!("IMAP login to {addr} timed out after {socket_timeout:?}"),
                ErrorCode::ImapSocketTimeout
            )
        })?
        .map_err(|(e, _)| {
            raise_error!(
                format!("IMAP login to {addr} as {} failed: {e}", config.username),
                ErrorCode::ImapAuthenticationFailed
            )
        })?;

    Ok(session)
}

/// Shared socket timeout applied around every IMAP command issued after
/// login (SEARCH, FETCH, EXAMINE). Always raises under
/// `ErrorCode::ImapSocketTimeout`/`ImapCommandFailed`, both transient per
/// spec.md 7.
pub async fn with_socket_timeout<T>(
    future: impl std::future::Future<Output = async_imap::error::Result<T>>,
) -> EngineResult<T> {
    let socket_timeout = Duration::from_secs(SETTINGS.engine_socket_timeout_secs);
    timeout(socket_timeout, future)
        .await
        .map_err(|_| {
            raise_error!(
                format!("IMAP command timed out after {socket_timeout:?}"),
                ErrorCode::ImapSocketTimeout
            )
        })?
        .map_err(|e| {
            raise_error!(
                format!("IMAP command failed: {e:?}"),
                ErrorCode::ImapCommandFailed
            )
        })
}
