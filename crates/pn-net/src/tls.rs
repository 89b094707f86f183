//! TLS upgrade for HTTPS origins.

use crate::client::BoxedIoStream;
use pn_core::NavError;
use pn_core::NavResult;
use std::net::TcpStream;

#[cfg(feature = "tls-rustls")]
pub(crate) fn connect_tls(mut stream: TcpStream, server_name: &str) -> NavResult<BoxedIoStream> {
    use rustls::ClientConfig;
    use rustls::ClientConnection;
    use rustls::RootCertStore;
    use rustls::StreamOwned;
    use rustls::pki_types::ServerName;
    use std::sync::Arc;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|error| {
            NavError::new(
                "net.tls.config_versions_invalid",
                format!("failed to configure TLS protocol versions: {error}"),
            )
        })?
        .with_root_certificates(roots)
        .with_no_client_auth();

    let name = ServerName::try_from(server_name.to_owned()).map_err(|error| {
        NavError::new(
            "net.tls.server_name_invalid",
            format!("invalid TLS server name `{server_name}`: {error}"),
        )
    })?;

    let mut connection = ClientConnection::new(Arc::new(config), name).map_err(|error| {
        NavError::new(
            "net.tls.connection_init_failed",
            format!("failed to initialize TLS connection for `{server_name}`: {error}"),
        )
    })?;

    connection.complete_io(&mut stream).map_err(|error| {
        NavError::new(
            "net.tls.handshake_failed",
            format!("TLS handshake failed for `{server_name}`: {error}"),
        )
    })?;

    Ok(Box::new(StreamOwned::new(connection, stream)))
}

#[cfg(not(feature = "tls-rustls"))]
pub(crate) fn connect_tls(_stream: TcpStream, _server_name: &str) -> NavResult<BoxedIoStream> {
    Err(NavError::new(
        "net.tls.backend_unavailable",
        "rustls backend is disabled for this build; enable `pn-net/tls-rustls`",
    ))
}
