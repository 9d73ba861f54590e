use crate::adapter::AdapterError;
use bytes::Bytes;
use fastwebsockets::FragmentCollector;
use http_body_util::Empty;
use hyper::{
    Request,
    header::{CONNECTION, UPGRADE},
    upgrade::Upgraded,
};
use hyper_util::rt::TokioIo;
use reqwest::Url;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, OwnedTrustAnchor},
};

pub type WebSocket = FragmentCollector<TokioIo<Upgraded>>;

/// برقراری اتصال وب‌سوکت (`ws://` ساده یا `wss://` امن)
pub async fn connect_ws(url: &Url) -> Result<WebSocket, AdapterError> {
    let domain = url
        .host_str()
        .ok_or_else(|| AdapterError::InvalidRequest(format!("missing host in {url}")))?
        .to_string();
    let secure = match url.scheme() {
        "wss" => true,
        "ws" => false,
        other => {
            return Err(AdapterError::InvalidRequest(format!(
                "unsupported websocket scheme {other:?}"
            )));
        }
    };
    let port = url.port().unwrap_or(if secure { 443 } else { 80 });
    let host_header = match url.port() {
        Some(port) => format!("{domain}:{port}"),
        None => domain.clone(),
    };

    // ۱. راه‌اندازی اتصال TCP
    let tcp_stream = setup_tcp(&domain, port).await?;

    if secure {
        // ۲. ارتقا به لایه امن TLS
        let tls_stream = upgrade_to_tls(&domain, tcp_stream).await?;
        // ۳. انجام دست‌دهی (Handshake) وب‌سوکت
        upgrade_to_websocket(&host_header, tls_stream, url).await
    } else {
        upgrade_to_websocket(&host_header, tcp_stream, url).await
    }
}

/// ساختار کمکی برای اجرای کارهای ناهمگام در پس‌زمینه
struct SpawnExecutor;

impl<Fut> hyper::rt::Executor<Fut> for SpawnExecutor
where
    Fut: std::future::Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    fn execute(&self, fut: Fut) {
        tokio::task::spawn(fut);
    }
}

async fn setup_tcp(domain: &str, port: u16) -> Result<TcpStream, AdapterError> {
    let addr = format!("{domain}:{port}");
    TcpStream::connect(&addr)
        .await
        .map_err(|e| AdapterError::WebsocketError(format!("{addr}: {e}")))
}

/// ایجاد تنظیمات و کانکتور TLS با استفاده از گواهی‌های ریشه
fn tls_connector() -> Result<TlsConnector, AdapterError> {
    let mut root_store = tokio_rustls::rustls::RootCertStore::empty();

    root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(TlsConnector::from(std::sync::Arc::new(config)))
}

async fn upgrade_to_tls(
    domain: &str,
    tcp_stream: TcpStream,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, AdapterError> {
    let domain: tokio_rustls::rustls::ServerName =
        tokio_rustls::rustls::ServerName::try_from(domain)
            .map_err(|_| AdapterError::ParseError("invalid dnsname".to_string()))?;

    tls_connector()?
        .connect(domain, tcp_stream)
        .await
        .map_err(|e| AdapterError::WebsocketError(e.to_string()))
}

async fn upgrade_to_websocket<S>(
    host: &str,
    stream: S,
    url: &Url,
) -> Result<WebSocket, AdapterError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let req: Request<Empty<Bytes>> = Request::builder()
        .method("GET")
        .uri(url.as_str())
        .header("Host", host)
        .header(UPGRADE, "websocket")
        .header(CONNECTION, "upgrade")
        .header(
            "Sec-WebSocket-Key",
            fastwebsockets::handshake::generate_key(),
        )
        .header("Sec-WebSocket-Version", "13")
        .body(Empty::<Bytes>::new())
        .map_err(|e| AdapterError::WebsocketError(e.to_string()))?;

    let (ws, _) = fastwebsockets::handshake::client(&SpawnExecutor, req, stream)
        .await
        .map_err(|e| AdapterError::WebsocketError(e.to_string()))?;

    Ok(FragmentCollector::new(ws))
}
