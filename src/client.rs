//! Client library for connecting to a memstash server

use crate::error::{Result, StashError};
use crate::protocol::{Response, CRLF};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Client for connecting to a memstash server
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl Client {
    /// Connect to a memstash server
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
        })
    }

    /// Store `value` under `key`. Returns `false` when the server answered `NOT-STORED`.
    pub async fn set(&mut self, key: &str, value: &[u8]) -> Result<bool> {
        let mut request = format!("set {} {}\r\n", key, value.len()).into_bytes();
        request.extend_from_slice(value);
        request.extend_from_slice(CRLF);
        self.send(&request).await?;

        match self.read_response(false).await? {
            Response::Stored => Ok(true),
            Response::NotStored => Ok(false),
            _ => Err(StashError::Client("Unexpected response for set".to_string())),
        }
    }

    /// Fetch the values of `keys`; absent keys are missing from the result
    pub async fn get(&mut self, keys: &[&str]) -> Result<Vec<(String, Vec<u8>)>> {
        self.send(format!("get {}\r\n", keys.join(" ")).as_bytes())
            .await?;

        match self.read_response(true).await? {
            Response::Values(values) => Ok(values),
            _ => Err(StashError::Client("Unexpected response for get".to_string())),
        }
    }

    /// Fetch a single value
    pub async fn get_one(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut values = self.get(&[key]).await?;
        Ok(values.pop().map(|(_, value)| value))
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn send(&mut self, request: &[u8]) -> Result<()> {
        self.writer.write_all(request).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(StashError::Client("Connection closed by server".to_string()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Read one response. `get` responses are a sequence of `VALUE` blocks ending
    /// with `END`; everything else is a single status line.
    async fn read_response(&mut self, values: bool) -> Result<Response> {
        if !values {
            let line = self.read_line().await?;
            return parse_status(&line);
        }

        let mut entries = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line == "END" {
                return Ok(Response::Values(entries));
            }

            let (key, size) = parse_value_header(&line)?;
            let mut payload = vec![0u8; size + CRLF.len()];
            self.reader.read_exact(&mut payload).await?;
            if !payload.ends_with(CRLF) {
                return Err(StashError::Client(format!(
                    "Value for {} is not terminated by CRLF",
                    key
                )));
            }
            payload.truncate(size);
            entries.push((key, payload));
        }
    }
}

fn parse_status(line: &str) -> Result<Response> {
    match line {
        "STORED" => Ok(Response::Stored),
        "NOT-STORED" => Ok(Response::NotStored),
        other => Err(StashError::Client(format!(
            "Unknown response format: {}",
            other
        ))),
    }
}

/// `VALUE <key> <flags> <size>`
fn parse_value_header(line: &str) -> Result<(String, usize)> {
    let invalid = || StashError::Client(format!("Unknown response format: {}", line));

    match line.split(' ').collect::<Vec<_>>()[..] {
        ["VALUE", key, _flags, size] => {
            let size = size.parse().map_err(|_| invalid())?;
            Ok((key.to_string(), size))
        }
        _ => Err(invalid()),
    }
}
