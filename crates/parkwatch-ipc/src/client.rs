//! IPC client used by parkwatchctl and intake services

use parkwatch_api::{Command, Event, Request, Response, ResponsePayload, ResponseResult};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::{IpcError, IpcResult};

/// One connection to parkwatchd. Requests are answered in order.
pub struct IpcClient {
    lines: LineReader,
    writer: OwnedWriteHalf,
    next_request_id: u64,
}

impl IpcClient {
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            lines: LineReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
        })
    }

    /// Send a command and return the raw response envelope
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let mut json = serde_json::to_string(&Request::new(request_id, command))?;
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;

        let response: Response = self.lines.next_message().await?;
        // Id 0 answers a line the daemon could not parse
        if response.request_id != request_id && response.request_id != 0 {
            return Err(IpcError::ServerError(format!(
                "response for request {} while waiting for {}",
                response.request_id, request_id
            )));
        }

        Ok(response)
    }

    /// Send a command; an error response becomes [`IpcError::Rejected`]
    pub async fn call(&mut self, command: Command) -> IpcResult<ResponsePayload> {
        match self.send(command).await?.result {
            ResponseResult::Ok(payload) => Ok(payload),
            ResponseResult::Err(info) => Err(IpcError::Rejected(info)),
        }
    }

    /// Subscribe to events, turning this connection into an event stream
    pub async fn subscribe(mut self) -> IpcResult<EventStream> {
        self.call(Command::SubscribeEvents).await?;
        Ok(EventStream {
            lines: self.lines,
            _writer: self.writer,
        })
    }
}

/// Events pushed by parkwatchd after [`IpcClient::subscribe`]
pub struct EventStream {
    lines: LineReader,
    // Dropping the write half shuts the socket down and the daemon would
    // forget the subscription
    _writer: OwnedWriteHalf,
}

impl EventStream {
    pub async fn next(&mut self) -> IpcResult<Event> {
        self.lines.next_message().await
    }
}

struct LineReader {
    reader: BufReader<OwnedReadHalf>,
    line: String,
}

impl LineReader {
    fn new(read_half: OwnedReadHalf) -> Self {
        Self {
            reader: BufReader::new(read_half),
            line: String::new(),
        }
    }

    async fn next_message<T: serde::de::DeserializeOwned>(&mut self) -> IpcResult<T> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Err(IpcError::ConnectionClosed);
            }
            let line = self.line.trim();
            if !line.is_empty() {
                return Ok(serde_json::from_str(line)?);
            }
        }
    }
}
