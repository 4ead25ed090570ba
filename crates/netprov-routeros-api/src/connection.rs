//! Authenticated API connection
//!
//! One command is in flight at a time; the stream sits behind a mutex so
//! a connection can be shared by reference across the session's calls.

use async_trait::async_trait;
use netprov_core::traits::{DeviceConnection, DeviceObject, Fields, Filter};
use netprov_core::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::codec::{Reply, attribute_word, command_word, query_word, read_sentence, write_sentence};

/// Rows and `!done` attributes of one command
#[derive(Debug, Default)]
pub struct Response {
    pub rows: Vec<Fields>,
    pub done: Fields,
}

/// Connection speaking the RouterOS API over any byte stream
pub struct ApiConnection<S> {
    stream: Mutex<BufStream<S>>,
    timeout: Duration,
    closed: AtomicBool,
}

impl<S> std::fmt::Debug for ApiConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConnection")
            .field("timeout", &self.timeout)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<S> ApiConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a connected stream; call [`ApiConnection::login`] next
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self {
            stream: Mutex::new(BufStream::new(stream)),
            timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Log in with the plain-text method (RouterOS 6.43+)
    ///
    /// A refused login is a connectivity error: the router is unusable with
    /// these credentials.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let words = [
            "/login".to_string(),
            attribute_word("name", username),
            attribute_word("password", password),
        ];
        match self.run(&words).await {
            Ok(response) if response.done.contains_key("ret") => Err(Error::connectivity(
                "Router requested challenge login; firmware older than 6.43 is not supported",
            )),
            Ok(_) => Ok(()),
            Err(Error::Protocol(message)) => Err(Error::connectivity(format!("Login refused: {}", message))),
            Err(e) => Err(e),
        }
    }

    /// Send one command and collect its replies
    ///
    /// A `!trap` becomes [`Error::Protocol`] once the trailing `!done` is
    /// read, leaving the stream ready for the next command.
    pub async fn run<W: AsRef<str>>(&self, words: &[W]) -> Result<Response> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::connectivity("API connection is closed"));
        }
        let command = words.first().map(|w| w.as_ref().to_string()).unwrap_or_default();

        let mut stream = self.stream.lock().await;
        let outcome = tokio::time::timeout(self.timeout, exchange(&mut *stream, words)).await;
        match outcome {
            Ok(Ok(Exchange::Completed(response))) => Ok(response),
            Ok(Ok(Exchange::Trapped(message))) => {
                debug!(command = %command, "Command trapped: {}", message);
                Err(Error::protocol(message))
            }
            Ok(Ok(Exchange::Fatal(message))) => {
                self.closed.store(true, Ordering::Release);
                Err(Error::connectivity(format!("Router closed the connection: {}", message)))
            }
            Ok(Err(e)) => {
                self.closed.store(true, Ordering::Release);
                Err(Error::connectivity(format!("API I/O failed during {}: {}", command, e)))
            }
            Err(_) => {
                self.closed.store(true, Ordering::Release);
                Err(Error::connectivity(format!(
                    "No reply to {} within {}s",
                    command,
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

enum Exchange {
    Completed(Response),
    Trapped(String),
    Fatal(String),
}

async fn exchange<S, W>(stream: &mut BufStream<S>, words: &[W]) -> std::io::Result<Exchange>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: AsRef<str>,
{
    write_sentence(stream, words).await?;

    let mut response = Response::default();
    let mut trap = None;
    loop {
        let sentence = read_sentence(stream).await?;
        if sentence.is_empty() {
            continue;
        }
        match Reply::parse(&sentence)? {
            Reply::Row(fields) => response.rows.push(fields),
            Reply::Trap { message, .. } => {
                trap.get_or_insert(message);
            }
            Reply::Fatal(message) => return Ok(Exchange::Fatal(message)),
            Reply::Done(done) => {
                response.done = done;
                return Ok(match trap {
                    Some(message) => Exchange::Trapped(message),
                    None => Exchange::Completed(response),
                });
            }
        }
    }
}

/// Split `.id` off a row and drop other dot-prefixed metadata
fn to_object(mut row: Fields) -> Result<DeviceObject> {
    let id = row
        .remove(".id")
        .ok_or_else(|| Error::protocol("Row without .id in reply"))?;
    row.retain(|key, _| !key.starts_with('.'));
    Ok(DeviceObject::new(id, row))
}

#[async_trait]
impl<S> DeviceConnection for ApiConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn list(&self, path: &str, filter: &Filter) -> Result<Vec<DeviceObject>> {
        let mut words = vec![command_word(path, "print")];
        words.extend(filter.pairs().iter().map(|(k, v)| query_word(k, v)));

        let response = self.run(&words).await?;
        let mut objects = Vec::with_capacity(response.rows.len());
        for row in response.rows {
            // Singleton menus (e.g. /system/resource) carry no .id
            if !row.contains_key(".id") {
                objects.push(DeviceObject::new("", row));
                continue;
            }
            let object = to_object(row)?;
            // Older firmware ignores some query words
            if filter.matches(&object) {
                objects.push(object);
            }
        }
        Ok(objects)
    }

    async fn add(&self, path: &str, fields: &Fields) -> Result<String> {
        let mut words = vec![command_word(path, "add")];
        words.extend(fields.iter().map(|(k, v)| attribute_word(k, v)));

        let response = self.run(&words).await?;
        response
            .done
            .get("ret")
            .cloned()
            .ok_or_else(|| Error::protocol(format!("{} add returned no id", path)))
    }

    async fn update(&self, path: &str, id: &str, fields: &Fields) -> Result<()> {
        let mut words = vec![command_word(path, "set"), attribute_word(".id", id)];
        words.extend(fields.iter().map(|(k, v)| attribute_word(k, v)));
        self.run(&words).await.map(|_| ())
    }

    async fn remove(&self, path: &str, id: &str) -> Result<()> {
        let words = [command_word(path, "remove"), attribute_word(".id", id)];
        self.run(&words).await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut stream = self.stream.lock().await;
        if let Err(e) = stream.shutdown().await {
            warn!("Error shutting down API stream: {}", e);
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "api"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_sentence;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn add_reads_ret_from_done() {
        let stream = Builder::new()
            .write(&encode_sentence(&["/queue/simple/add", "=max-limit=20M/5M", "=name=contract-42"]))
            .read(&encode_sentence(&["!done", "=ret=*2B"]))
            .build();
        let conn = ApiConnection::new(stream, Duration::from_secs(1));

        let mut fields = Fields::new();
        fields.insert("name".into(), "contract-42".into());
        fields.insert("max-limit".into(), "20M/5M".into());
        assert_eq!(conn.add("/queue/simple", &fields).await.unwrap(), "*2B");
    }

    #[tokio::test]
    async fn trap_without_message_still_fails() {
        let mut replies = encode_sentence(&["!trap"]);
        replies.extend(encode_sentence(&["!done"]));
        let stream = Builder::new()
            .write(&encode_sentence(&["/ip/arp/remove", "=.id=*9"]))
            .read(&replies)
            .build();
        let conn = ApiConnection::new(stream, Duration::from_secs(1));

        let err = conn.remove("/ip/arp", "*9").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m == "unknown failure"), "Got {:?}", err);
    }
}
