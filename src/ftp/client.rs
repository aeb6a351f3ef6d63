use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{lookup_host, TcpListener, TcpStream},
    time::timeout,
};

use super::{
    transport::{DataReader, DataWriter, FtpConnector, FtpSession, Reply},
    FtpConfig,
};
use crate::{
    cancel::CancelChecker,
    error::{ConnectionStage, Error, Result},
};

/// How often a running `LIST` download looks at its cancel checker
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for each reply that follows an `ABOR`
const ABORT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

const LIST_CHUNK: usize = 16 * 1024;

/// Connects with the built-in tokio FTP client
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConnector;

#[async_trait]
impl FtpConnector for NativeConnector {
    async fn connect(&self, config: &FtpConfig) -> Result<Box<dyn FtpSession>> {
        Ok(Box::new(NativeSession::connect(config).await?))
    }
}

enum DataChannel {
    Passive(SocketAddr),
    Active(TcpListener),
}

struct NativeSession {
    control: BufReader<TcpStream>,
    peer: IpAddr,
    local: IpAddr,
    active: bool,
    cwd: Option<String>,
    transfer_pending: bool,
    alive: bool,
}

/// Parses the address out of a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`
fn parse_pasv(text: &str) -> Option<SocketAddr> {
    let start = match text.find('(') {
        Some(i) => i + 1,
        None => text.find(|c: char| c.is_ascii_digit())?,
    };
    let numbers = text[start..]
        .split(|c: char| !c.is_ascii_digit() && c != ',')
        .next()?;
    let parts = numbers
        .split(',')
        .map(|n| n.parse::<u8>().ok())
        .collect::<Option<Vec<_>>>()?;
    if parts.len() != 6 {
        return None;
    }

    let ip = Ipv4Addr::new(parts[0], parts[1], parts[2], parts[3]);
    let port = (u16::from(parts[4]) << 8) | u16::from(parts[5]);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Parses the port out of a `229 Entering Extended Passive Mode (|||port|)`
fn parse_epsv(text: &str) -> Option<u16> {
    let start = text.find("|||")? + 3;
    let end = text[start..].find('|')? + start;
    text[start..end].parse().ok()
}

fn port_command(addr: SocketAddr) -> String {
    match addr.ip() {
        IpAddr::V4(ip) => {
            let [a, b, c, d] = ip.octets();
            format!("PORT {a},{b},{c},{d},{},{}", addr.port() >> 8, addr.port() & 0xff)
        }
        IpAddr::V6(ip) => format!("EPRT |2|{ip}|{}|", addr.port()),
    }
}

impl NativeSession {
    async fn connect(config: &FtpConfig) -> Result<Self> {
        let addrs = lookup_host((config.server_url.as_str(), config.port))
            .await
            .map_err(|e| Error::connection(ConnectionStage::Resolve, e))?
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(Error::connection(
                ConnectionStage::Resolve,
                format!("no address for {}", config.server_url),
            ));
        }

        let stream = TcpStream::connect(&addrs[..])
            .await
            .map_err(|e| Error::connection(ConnectionStage::Connect, e))?;
        let peer = stream.peer_addr()?.ip();
        let local = stream.local_addr()?.ip();

        debug!("connected to ftp server at {peer}");

        let mut session = Self {
            control: BufReader::new(stream),
            peer,
            local,
            active: config.active,
            cwd: None,
            transfer_pending: false,
            alive: true,
        };

        let mut greeting = session
            .read_reply()
            .await
            .map_err(|e| Error::connection(ConnectionStage::Handshake, e))?;
        // 120: service ready in a few minutes
        while greeting.code == 120 {
            greeting = session.read_reply().await?;
        }
        if greeting.code != 220 {
            return Err(Error::connection(ConnectionStage::Handshake, greeting.text));
        }

        session.login(config).await?;
        let _ = session.exchange("TYPE I").await?.check(None)?;

        Ok(session)
    }

    async fn login(&mut self, config: &FtpConfig) -> Result<()> {
        let user = if config.user.is_empty() {
            "anonymous"
        } else {
            config.user.as_str()
        };
        let reply = self.exchange(&format!("USER {user}")).await?;
        if reply.code == 230 {
            return Ok(());
        }
        if !reply.is_intermediate() {
            return Err(Error::connection(ConnectionStage::Authentication, reply.text));
        }

        let passwd = if config.passwd.is_empty() && config.user.is_empty() {
            "anonymous@"
        } else {
            config.passwd.as_str()
        };
        let reply = self.exchange(&format!("PASS {passwd}")).await?;
        match reply.code {
            230 | 202 => Ok(()),
            _ => Err(Error::connection(ConnectionStage::Authentication, reply.text)),
        }
    }

    async fn send(&mut self, command: &str) -> Result<()> {
        if command.contains(['\r', '\n']) {
            return Err(Error::InvalidArgument(format!("{command:?} contains a line break")));
        }

        if command.starts_with("PASS ") {
            trace!("-> PASS ****");
        } else {
            trace!("-> {command}");
        }

        let line = format!("{command}\r\n");
        let result = self.control.get_mut().write_all(line.as_bytes()).await;
        if let Err(err) = result {
            self.alive = false;
            return Err(err.into());
        }
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        match self.control.read_line(&mut line).await {
            Ok(0) => {
                self.alive = false;
                Err(Error::UnexpectedEof)
            }
            Ok(_) => Ok(line.trim_end_matches(['\r', '\n']).to_owned()),
            Err(err) => {
                self.alive = false;
                Err(err.into())
            }
        }
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let first = self.read_line().await?;
        let code = first
            .get(..3)
            .and_then(|c| c.parse::<u32>().ok())
            .ok_or_else(|| Error::ftp(0, format!("malformed reply: {first}")))?;

        let mut text = first.get(4..).unwrap_or_default().to_owned();
        if first.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{code} ");
            loop {
                let line = self.read_line().await?;
                text.push('\n');
                if let Some(last) = line.strip_prefix(&terminator) {
                    text.push_str(last);
                    break;
                }
                text.push_str(&line);
            }
        }

        trace!("<- {code} {text}");

        if code == 421 {
            self.alive = false;
        }
        Ok(Reply { code, text })
    }

    async fn exchange(&mut self, command: &str) -> Result<Reply> {
        self.send(command).await?;
        self.read_reply().await
    }

    /// Aborts a transfer left pending by a dropped data stream
    async fn settle(&mut self) -> Result<()> {
        if !self.transfer_pending {
            return Ok(());
        }
        self.transfer_pending = false;
        self.send("ABOR").await?;

        // the completion reply of the transfer itself may precede the one for ABOR
        for _ in 0..2 {
            match timeout(ABORT_REPLY_TIMEOUT, self.read_reply()).await {
                Ok(reply) => {
                    let _ = reply?;
                }
                Err(_) => break,
            }
        }
        Ok(())
    }

    async fn prepare_data(&mut self) -> Result<DataChannel> {
        if self.active {
            let listener = TcpListener::bind(SocketAddr::new(self.local, 0)).await?;
            let command = port_command(listener.local_addr()?);
            let _ = self.exchange(&command).await?.check(None)?;
            return Ok(DataChannel::Active(listener));
        }

        if self.peer.is_ipv6() {
            let reply = self.exchange("EPSV").await?.check(None)?;
            let port = parse_epsv(&reply.text)
                .ok_or_else(|| Error::ftp(reply.code, format!("malformed EPSV reply: {}", reply.text)))?;
            return Ok(DataChannel::Passive(SocketAddr::new(self.peer, port)));
        }

        let reply = self.exchange("PASV").await?.check(None)?;
        let mut addr = parse_pasv(&reply.text)
            .ok_or_else(|| Error::ftp(reply.code, format!("malformed PASV reply: {}", reply.text)))?;
        // 0.0.0.0 stands for the address of the control connection
        if addr.ip().is_unspecified() {
            addr.set_ip(self.peer);
        }
        Ok(DataChannel::Passive(addr))
    }

    /// Opens the data connection for `command` and waits for the server to
    /// start the transfer
    async fn start_transfer(&mut self, command: &str, path: Option<&str>) -> Result<TcpStream> {
        let channel = self.prepare_data().await?;
        let passive = match &channel {
            DataChannel::Passive(addr) => Some(TcpStream::connect(addr).await?),
            DataChannel::Active(_) => None,
        };

        let reply = self.exchange(command).await?.check(path)?;
        if !reply.is_preliminary() {
            return Err(Error::ftp(reply.code, format!("transfer did not start: {}", reply.text)));
        }
        self.transfer_pending = true;

        match (channel, passive) {
            (_, Some(stream)) => Ok(stream),
            (DataChannel::Active(listener), None) => Ok(listener.accept().await?.0),
            (DataChannel::Passive(_), None) => Err(Error::UnexpectedEof),
        }
    }
}

#[async_trait]
impl FtpSession for NativeSession {
    fn working_dir(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    async fn change_dir(&mut self, dir: &str) -> Result<()> {
        self.settle().await?;
        if self.cwd.as_deref() == Some(dir) {
            return Ok(());
        }

        let _ = self.exchange(&format!("CWD {dir}")).await?.check(Some(dir))?;
        self.cwd = Some(dir.to_owned());
        Ok(())
    }

    async fn list(&mut self, dir: &str, cancel: &CancelChecker) -> Result<Vec<u8>> {
        self.change_dir(dir).await?;
        cancel.check()?;

        let mut data = self.start_transfer("LIST", Some(dir)).await?;
        let mut listing = Vec::new();
        let mut chunk = vec![0; LIST_CHUNK];
        loop {
            if cancel.is_cancelled() {
                drop(data);
                self.abort().await?;
                return Err(Error::Cancelled);
            }
            match timeout(CANCEL_POLL_INTERVAL, data.read(&mut chunk)).await {
                Err(_) => continue,
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => listing.extend_from_slice(&chunk[..n]),
                Ok(Err(err)) => {
                    error!("LIST {dir} failed: {err}");
                    self.alive = false;
                    return Err(err.into());
                }
            }
        }
        drop(data);

        self.finish_transfer().await?;
        Ok(listing)
    }

    async fn command(&mut self, command: &str) -> Result<Reply> {
        self.settle().await?;
        self.exchange(command).await
    }

    async fn retrieve(&mut self, path: &str, offset: u64) -> Result<DataReader> {
        self.settle().await?;
        if offset > 0 {
            let _ = self.exchange(&format!("REST {offset}")).await?.check(None)?;
        }
        let stream = self.start_transfer(&format!("RETR {path}"), Some(path)).await?;
        Ok(Box::new(stream))
    }

    async fn store(&mut self, path: &str, append: bool) -> Result<DataWriter> {
        self.settle().await?;
        let verb = if append { "APPE" } else { "STOR" };
        let stream = self.start_transfer(&format!("{verb} {path}"), None).await?;
        Ok(Box::new(stream))
    }

    async fn finish_transfer(&mut self) -> Result<()> {
        if !self.transfer_pending {
            return Ok(());
        }
        self.transfer_pending = false;
        let _ = self.read_reply().await?.check(None)?;
        Ok(())
    }

    async fn abort(&mut self) -> Result<()> {
        self.settle().await
    }

    fn reset(&mut self) {
        // a pending transfer is aborted lazily by the next command
    }

    fn is_alive(&self) -> bool {
        self.alive
    }
}

#[cfg(test)]
mod test_client {
    use super::*;

    #[test]
    fn test_parse_pasv() {
        let addr = parse_pasv("Entering Passive Mode (192,168,1,20,195,80).").unwrap();
        assert_eq!(addr, "192.168.1.20:50000".parse().unwrap());
        let addr = parse_pasv("Entering Passive Mode 10,0,0,1,0,21").unwrap();
        assert_eq!(addr, "10.0.0.1:21".parse().unwrap());
        assert!(parse_pasv("Entering Passive Mode (1,2,3)").is_none());
    }

    #[test]
    fn test_parse_epsv() {
        assert_eq!(parse_epsv("Entering Extended Passive Mode (|||6446|)"), Some(6446));
        assert_eq!(parse_epsv("garbage"), None);
    }

    #[test]
    fn test_port_command() {
        assert_eq!(port_command("10.0.0.5:50000".parse().unwrap()), "PORT 10,0,0,5,195,80");
        assert_eq!(port_command("[::1]:2121".parse().unwrap()), "EPRT |2|::1|2121|");
    }

    async fn serve(script: &'static [(&'static str, &'static str)]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _ = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            stream.get_mut().write_all(b"220-welcome\r\n220 ready\r\n").await.unwrap();
            for (expected, reply) in script {
                let mut line = String::new();
                let _ = stream.read_line(&mut line).await.unwrap();
                assert_eq!(line.trim_end(), *expected);
                stream.get_mut().write_all(reply.as_bytes()).await.unwrap();
            }
        });
        port
    }

    #[tokio::test]
    async fn test_login_and_commands() {
        let port = serve(&[
            ("USER anna", "331 password please\r\n"),
            ("PASS secret", "230 ok\r\n"),
            ("TYPE I", "200 binary\r\n"),
            ("CWD /pub", "250 ok\r\n"),
            ("DELE /pub/x", "550-no such file\r\n more detail\r\n550 end\r\n"),
        ])
        .await;

        let config = FtpConfig {
            user: "anna".into(),
            passwd: "secret".into(),
            port,
            ..FtpConfig::new("127.0.0.1")
        };
        let mut session = NativeConnector.connect(&config).await.unwrap();
        session.change_dir("/pub").await.unwrap();
        assert_eq!(session.working_dir(), Some("/pub"));
        // same directory, no exchange
        session.change_dir("/pub").await.unwrap();

        let reply = session.command("DELE /pub/x").await.unwrap();
        assert_eq!(reply.code, 550);
        assert_eq!(reply.text, "no such file\n more detail\nend");
        assert!(session.is_alive());
    }

    #[tokio::test]
    async fn test_rejected_login() {
        let port = serve(&[("USER anonymous", "331 any\r\n"), ("PASS anonymous@", "530 no\r\n")]).await;
        let config = FtpConfig {
            port,
            ..FtpConfig::new("127.0.0.1")
        };
        let err = NativeConnector.connect(&config).await.err().unwrap();
        assert!(matches!(
            err,
            Error::Connection {
                stage: ConnectionStage::Authentication,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_line_breaks_are_refused() {
        let port = serve(&[
            ("USER anonymous", "230 ok\r\n"),
            ("TYPE I", "200 binary\r\n"),
        ])
        .await;
        let config = FtpConfig {
            port,
            ..FtpConfig::new("127.0.0.1")
        };
        let mut session = NativeConnector.connect(&config).await.unwrap();
        let err = session.command("DELE a\r\nRMD /").await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
