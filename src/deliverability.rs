//! Email deliverability estimate.
//!
//! Looks up the address's domain (address and MX records) and, when a mail
//! exchanger exists, asks it over SMTP whether it would accept the
//! recipient. Nothing is ever sent: the exchange stops after `RCPT TO`.
//! The result is a 0-100 score and a three-way verdict. None of this gates
//! a search.

use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{EmailValidator, Identifier, ReconError, Result};

const SMTP_PORT: u16 = 25;
const DEFAULT_SMTP_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HELO_NAME: &str = "localhost";

const ADDRESS_POINTS: u8 = 30;
const MX_POINTS: u8 = 40;
const SMTP_ACCEPTED_POINTS: u8 = 30;
const SMTP_DEFERRED_POINTS: u8 = 15;

const DELIVERABLE_SCORE: u8 = 70;
const MAYBE_SCORE: u8 = 40;

/// One mail exchanger of a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MxHost {
    pub preference: u16,
    pub exchange: String,
}

/// DNS facts about a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainReport {
    pub domain: String,
    pub domain_resolves: bool,
    pub address_count: usize,
    pub mx_exists: bool,
    /// Mail exchangers, most preferred first.
    pub mx_hosts: Vec<MxHost>,
}

/// What the mail exchanger said about the recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum SmtpVerdict {
    /// 250 to `RCPT TO`.
    Accepted,
    /// 450, 451 or 452: try again later.
    Deferred(u16),
    /// Any other reply code.
    Rejected(u16),
    /// The conversation did not reach `RCPT TO`.
    Unreachable(String),
    /// No mail exchanger to ask.
    Skipped,
}

impl SmtpVerdict {
    fn from_code(code: u16) -> Self {
        match code {
            250 => SmtpVerdict::Accepted,
            450..=452 => SmtpVerdict::Deferred(code),
            other => SmtpVerdict::Rejected(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Deliverability {
    Deliverable,
    Maybe,
    Undeliverable,
}

impl Deliverability {
    pub fn from_score(score: u8) -> Self {
        if score >= DELIVERABLE_SCORE {
            Deliverability::Deliverable
        } else if score >= MAYBE_SCORE {
            Deliverability::Maybe
        } else {
            Deliverability::Undeliverable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Deliverability::Deliverable => "deliverable",
            Deliverability::Maybe => "maybe",
            Deliverability::Undeliverable => "undeliverable",
        }
    }
}

/// Full deliverability estimate for one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliverabilityReport {
    pub email: String,
    pub domain: DomainReport,
    pub smtp: SmtpVerdict,
    pub score: u8,
    pub verdict: Deliverability,
}

/// Points earned by a domain report and an SMTP verdict.
pub fn score(domain: &DomainReport, smtp: &SmtpVerdict) -> u8 {
    let mut score = 0;
    if domain.domain_resolves {
        score += ADDRESS_POINTS;
    }
    if domain.mx_exists {
        score += MX_POINTS;
    }
    score += match smtp {
        SmtpVerdict::Accepted => SMTP_ACCEPTED_POINTS,
        SmtpVerdict::Deferred(_) => SMTP_DEFERRED_POINTS,
        _ => 0,
    };
    score
}

/// DNS and SMTP checks for email domains.
pub struct DomainChecker {
    resolver: TokioAsyncResolver,
    smtp_port: u16,
    smtp_timeout: Duration,
    helo_name: String,
}

impl DomainChecker {
    /// Uses the system resolver configuration, falling back to the
    /// resolver library's defaults when it cannot be read.
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!("System resolver configuration unavailable ({}), using defaults", e);
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self::with_resolver(resolver)
    }

    pub fn with_resolver(resolver: TokioAsyncResolver) -> Self {
        Self {
            resolver,
            smtp_port: SMTP_PORT,
            smtp_timeout: DEFAULT_SMTP_TIMEOUT,
            helo_name: DEFAULT_HELO_NAME.to_string(),
        }
    }

    /// Bounds the whole SMTP conversation.
    pub fn with_smtp_timeout(mut self, timeout: Duration) -> Self {
        self.smtp_timeout = timeout;
        self
    }

    pub fn with_smtp_port(mut self, port: u16) -> Self {
        self.smtp_port = port;
        self
    }

    /// Name announced in `HELO`.
    pub fn with_helo_name(mut self, name: impl Into<String>) -> Self {
        self.helo_name = name.into();
        self
    }

    /// Looks up address and MX records for `domain`. Lookup failures read
    /// as missing records.
    pub async fn check_domain(&self, domain: &str) -> DomainReport {
        let address_count = match self.resolver.lookup_ip(domain).await {
            Ok(lookup) => lookup.iter().count(),
            Err(e) => {
                debug!("No addresses for {}: {}", domain, e);
                0
            }
        };

        let mut mx_hosts: Vec<MxHost> = match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => lookup
                .iter()
                .map(|mx| MxHost {
                    preference: mx.preference(),
                    exchange: mx.exchange().to_utf8().trim_end_matches('.').to_string(),
                })
                .collect(),
            Err(e) => {
                debug!("No MX records for {}: {}", domain, e);
                Vec::new()
            }
        };
        mx_hosts.sort_by_key(|mx| mx.preference);

        DomainReport {
            domain: domain.to_string(),
            domain_resolves: address_count > 0,
            address_count,
            mx_exists: !mx_hosts.is_empty(),
            mx_hosts,
        }
    }

    /// Asks `host` whether it would accept mail for `email`.
    pub async fn rcpt_check(&self, host: &str, email: &str) -> SmtpVerdict {
        let conversation = rcpt_exchange(host, self.smtp_port, &self.helo_name, email);
        match timeout(self.smtp_timeout, conversation).await {
            Ok(Ok(code)) => SmtpVerdict::from_code(code),
            Ok(Err(e)) => {
                debug!("SMTP check against {} failed: {}", host, e);
                SmtpVerdict::Unreachable(e.to_string())
            }
            Err(_) => SmtpVerdict::Unreachable(format!(
                "timeout: no answer within {:?}",
                self.smtp_timeout
            )),
        }
    }

    /// Estimates whether `email` can receive mail.
    ///
    /// Fails only when `email` is not a well-formed address.
    pub async fn check_email(&self, email: &str) -> Result<DeliverabilityReport> {
        let identifier = Identifier::parse(email, &EmailValidator::new())?;
        let email = identifier.as_str();
        let domain = email
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .ok_or_else(|| ReconError::InvalidIdentifier("missing @".into()))?;

        let report = self.check_domain(domain).await;
        let smtp = match report.mx_hosts.first() {
            Some(mx) => self.rcpt_check(&mx.exchange, email).await,
            None => SmtpVerdict::Skipped,
        };
        let score = score(&report, &smtp);

        Ok(DeliverabilityReport {
            email: email.to_string(),
            domain: report,
            smtp,
            score,
            verdict: Deliverability::from_score(score),
        })
    }
}

impl Default for DomainChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Looks up `domain` with the system resolver.
pub async fn check_domain(domain: &str) -> DomainReport {
    DomainChecker::new().check_domain(domain).await
}

/// Runs greeting, `HELO`, `MAIL FROM:<>` and `RCPT TO` and returns the
/// recipient reply code.
async fn rcpt_exchange(host: &str, port: u16, helo_name: &str, email: &str) -> Result<u16> {
    let stream = TcpStream::connect((host, port)).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    expect_reply(&mut reader, 220, "greeting").await?;
    send_line(&mut write_half, &format!("HELO {}", helo_name)).await?;
    expect_reply(&mut reader, 250, "HELO").await?;
    send_line(&mut write_half, "MAIL FROM:<>").await?;
    expect_reply(&mut reader, 250, "MAIL FROM").await?;
    send_line(&mut write_half, &format!("RCPT TO:<{}>", email)).await?;
    let code = read_reply(&mut reader).await?;

    if send_line(&mut write_half, "QUIT").await.is_ok() {
        let _ = read_reply(&mut reader).await;
    }
    Ok(code)
}

async fn send_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer.write_all(format!("{}\r\n", line).as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn expect_reply<R: AsyncBufRead + Unpin>(reader: &mut R, wanted: u16, step: &str) -> Result<()> {
    let code = read_reply(reader).await?;
    if code == wanted {
        Ok(())
    } else {
        Err(ReconError::Transport(format!(
            "{} answered {} instead of {}",
            step, code, wanted
        )))
    }
}

/// Reads one possibly multi-line reply and returns its code.
async fn read_reply<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<u16> {
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(ReconError::Transport("connection closed mid-reply".into()));
        }
        let code = line
            .get(..3)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| ReconError::Parse(format!("malformed SMTP reply: {}", line.trim_end())))?;
        if line.as_bytes().get(3) != Some(&b'-') {
            return Ok(code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn report(resolves: bool, mx: bool) -> DomainReport {
        DomainReport {
            domain: "example.com".into(),
            domain_resolves: resolves,
            address_count: usize::from(resolves),
            mx_exists: mx,
            mx_hosts: if mx {
                vec![MxHost {
                    preference: 10,
                    exchange: "mx.example.com".into(),
                }]
            } else {
                Vec::new()
            },
        }
    }

    /// Serves one scripted SMTP session and returns the lines it received.
    async fn fake_smtp(rcpt_reply: &'static str) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let mut received = Vec::new();

            write_half
                .write_all(b"220-mx.test ESMTP\r\n220 ready\r\n")
                .await
                .unwrap();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                let reply: &[u8] = if line.starts_with("HELO") {
                    b"250 mx.test\r\n"
                } else if line.starts_with("MAIL FROM") {
                    b"250 ok\r\n"
                } else if line.starts_with("RCPT TO") {
                    rcpt_reply.as_bytes()
                } else {
                    b"221 bye\r\n"
                };
                let quitting = line == "QUIT";
                received.push(line);
                write_half.write_all(reply).await.unwrap();
                if quitting {
                    break;
                }
            }
            received
        });
        (port, handle)
    }

    fn checker(port: u16) -> DomainChecker {
        DomainChecker::with_resolver(TokioAsyncResolver::tokio(
            ResolverConfig::default(),
            ResolverOpts::default(),
        ))
        .with_smtp_port(port)
        .with_smtp_timeout(Duration::from_secs(5))
        .with_helo_name("checker.test")
    }

    #[test]
    fn test_score_and_verdict() {
        let full = score(&report(true, true), &SmtpVerdict::Accepted);
        assert_eq!(full, 100);
        assert_eq!(Deliverability::from_score(full), Deliverability::Deliverable);

        let deferred = score(&report(true, true), &SmtpVerdict::Deferred(451));
        assert_eq!(deferred, 85);

        let mx_only = score(&report(false, true), &SmtpVerdict::Rejected(550));
        assert_eq!(mx_only, 40);
        assert_eq!(Deliverability::from_score(mx_only), Deliverability::Maybe);

        let address_only = score(&report(true, false), &SmtpVerdict::Skipped);
        assert_eq!(address_only, 30);
        assert_eq!(
            Deliverability::from_score(address_only),
            Deliverability::Undeliverable
        );

        assert_eq!(Deliverability::from_score(69), Deliverability::Maybe);
        assert_eq!(Deliverability::from_score(39), Deliverability::Undeliverable);
    }

    #[test]
    fn test_verdict_from_code() {
        assert_eq!(SmtpVerdict::from_code(250), SmtpVerdict::Accepted);
        assert_eq!(SmtpVerdict::from_code(450), SmtpVerdict::Deferred(450));
        assert_eq!(SmtpVerdict::from_code(452), SmtpVerdict::Deferred(452));
        assert_eq!(SmtpVerdict::from_code(550), SmtpVerdict::Rejected(550));
    }

    #[tokio::test]
    async fn test_read_multiline_reply() {
        let mut input: &[u8] = b"250-first\r\n250-second\r\n250 last\r\n354 next\r\n";
        assert_eq!(read_reply(&mut input).await.unwrap(), 250);
        assert_eq!(read_reply(&mut input).await.unwrap(), 354);
        assert!(read_reply(&mut input).await.is_err());

        let mut garbage: &[u8] = b"hello\r\n";
        assert!(matches!(
            read_reply(&mut garbage).await,
            Err(ReconError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_rcpt_accepted() {
        let (port, server) = fake_smtp("250 2.1.5 ok\r\n").await;
        let verdict = checker(port).rcpt_check("127.0.0.1", "user@example.com").await;
        assert_eq!(verdict, SmtpVerdict::Accepted);

        let received = server.await.unwrap();
        assert_eq!(
            received,
            vec![
                "HELO checker.test",
                "MAIL FROM:<>",
                "RCPT TO:<user@example.com>",
                "QUIT",
            ]
        );
    }

    #[tokio::test]
    async fn test_rcpt_deferred_and_rejected() {
        let (port, _server) = fake_smtp("451 4.7.1 greylisted\r\n").await;
        let verdict = checker(port).rcpt_check("127.0.0.1", "user@example.com").await;
        assert_eq!(verdict, SmtpVerdict::Deferred(451));

        let (port, _server) = fake_smtp("550-5.1.1 no such user\r\n550 5.1.1 bye\r\n").await;
        let verdict = checker(port).rcpt_check("127.0.0.1", "user@example.com").await;
        assert_eq!(verdict, SmtpVerdict::Rejected(550));
    }

    #[tokio::test]
    async fn test_rcpt_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let verdict = checker(port).rcpt_check("127.0.0.1", "user@example.com").await;
        assert!(matches!(verdict, SmtpVerdict::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let verdict = checker(port)
            .with_smtp_timeout(Duration::from_millis(200))
            .rcpt_check("127.0.0.1", "user@example.com")
            .await;
        match verdict {
            SmtpVerdict::Unreachable(detail) => assert!(detail.contains("timeout")),
            other => panic!("unexpected verdict: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_check_email_rejects_malformed() {
        let result = checker(SMTP_PORT).check_email("not-an-address").await;
        assert!(matches!(result, Err(ReconError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_report_serializes() {
        let value = serde_json::to_value(DeliverabilityReport {
            email: "user@example.com".into(),
            domain: report(true, true),
            smtp: SmtpVerdict::Deferred(451),
            score: 85,
            verdict: Deliverability::Deliverable,
        })
        .unwrap();
        assert_eq!(value["verdict"], "deliverable");
        assert_eq!(value["smtp"]["result"], "deferred");
        assert_eq!(value["smtp"]["detail"], 451);
        assert_eq!(value["domain"]["mx_hosts"][0]["exchange"], "mx.example.com");
    }
}
