use clap::{Args, Parser, Subcommand, ValueEnum};
use knockr_common::model::{
    ContentEncoding, IcmpSizeMode, ProtocolPreference, ResourceCheck, SequenceStep, StepKind,
};

#[derive(Parser)]
#[command(name = "knockr")]
#[command(about = "A port-knocking client.")]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a knock sequence to a host
    #[command(alias = "k")]
    Knock(KnockArgs),
}

#[derive(Args)]
pub struct KnockArgs {
    /// Target host name or address
    pub host: String,

    /// Steps in order: udp:PORT[/ENC:TEXT], tcp:PORT, icmp:SIZE[xCOUNT][/ENC:TEXT]
    /// where ENC is raw, hex, base64 or esc
    #[arg(required = true, value_parser = parse_step)]
    pub steps: Vec<SequenceStep>,

    /// Delay between steps in milliseconds (0-15000)
    #[arg(long, default_value_t = 500)]
    pub delay: u64,

    /// TTL / hop-limit override (0 keeps the system default)
    #[arg(long)]
    pub ttl: Option<u8>,

    /// Fixed local source port for UDP and TCP steps
    #[arg(long)]
    pub local_port: Option<u16>,

    /// Which address family to resolve the host to
    #[arg(long, value_enum, default_value = "4")]
    pub ipv: IpPreference,

    /// What an ICMP step's SIZE covers
    #[arg(long, value_enum, default_value = "payload")]
    pub icmp_size_mode: SizeMode,

    /// Probe HOST:PORT for reachability after the knock
    #[arg(long, value_name = "HOST:PORT", value_parser = parse_check_target)]
    pub check: Option<(String, u16)>,

    /// Connect timeout for the reachability probe in seconds (1-10)
    #[arg(long, default_value_t = 5)]
    pub check_timeout: u64,

    /// Pause between probe attempts in seconds (30-300, 15 s steps)
    #[arg(long, default_value_t = 30)]
    pub check_period: u64,

    /// Probe attempts before giving up (1-5)
    #[arg(long, default_value_t = 3)]
    pub check_retries: u32,
}

impl KnockArgs {
    pub fn resource_check(&self) -> Option<ResourceCheck> {
        self.check.as_ref().map(|(host, port)| ResourceCheck {
            host: host.clone(),
            port: *port,
            timeout_secs: self.check_timeout,
            period_secs: self.check_period,
            max_retries: self.check_retries,
        })
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum IpPreference {
    /// Prefer IPv4, fall back to IPv6
    #[value(name = "4")]
    Prefer4,
    /// Prefer IPv6, fall back to IPv4
    #[value(name = "6")]
    Prefer6,
    /// IPv4 only
    Only4,
    /// IPv6 only
    Only6,
}

impl From<IpPreference> for ProtocolPreference {
    fn from(value: IpPreference) -> Self {
        match value {
            IpPreference::Prefer4 => ProtocolPreference::PreferIpv4,
            IpPreference::Prefer6 => ProtocolPreference::PreferIpv6,
            IpPreference::Only4 => ProtocolPreference::Ipv4Only,
            IpPreference::Only6 => ProtocolPreference::Ipv6Only,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SizeMode {
    /// SIZE is the echo payload length
    Payload,
    /// SIZE includes the 8-byte ICMP header
    Icmp,
    /// SIZE includes the IP header as well
    Ip,
}

impl From<SizeMode> for IcmpSizeMode {
    fn from(value: SizeMode) -> Self {
        match value {
            SizeMode::Payload => IcmpSizeMode::PayloadOnly,
            SizeMode::Icmp => IcmpSizeMode::WithIcmpHeader,
            SizeMode::Ip => IcmpSizeMode::WithIpHeader,
        }
    }
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

pub fn parse_step(input: &str) -> Result<SequenceStep, String> {
    let (kind, rest) = input
        .split_once(':')
        .ok_or_else(|| format!("'{input}' is not KIND:VALUE"))?;
    let (value, content) = match rest.split_once('/') {
        Some((value, content)) => (value, Some(content)),
        None => (rest, None),
    };
    let (content, encoding) = parse_content(content)?;

    match kind {
        "udp" => Ok(SequenceStep {
            kind: StepKind::Udp,
            port: Some(parse_port(value)?),
            content,
            encoding,
            ..Default::default()
        }),
        "tcp" => {
            if content.is_some() {
                return Err("tcp steps carry no payload".into());
            }
            Ok(SequenceStep {
                kind: StepKind::Tcp,
                port: Some(parse_port(value)?),
                ..Default::default()
            })
        }
        "icmp" => {
            let (size, count) = match value.split_once('x') {
                Some((size, count)) => {
                    let count: u16 = count
                        .parse()
                        .map_err(|_| format!("'{count}' is not a packet count"))?;
                    (size, Some(count))
                }
                None => (value, None),
            };
            let size: u16 = size
                .parse()
                .map_err(|_| format!("'{size}' is not a packet size"))?;
            Ok(SequenceStep {
                kind: StepKind::Icmp,
                icmp_size: Some(size),
                icmp_count: count,
                content,
                encoding,
                ..Default::default()
            })
        }
        other => Err(format!("unknown step kind '{other}'")),
    }
}

fn parse_port(value: &str) -> Result<u16, String> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(format!("'{value}' is not a port (1-65535)")),
    }
}

fn parse_content(content: Option<&str>) -> Result<(Option<String>, ContentEncoding), String> {
    let Some(content) = content else {
        return Ok((None, ContentEncoding::Raw));
    };
    let (enc, text) = content
        .split_once(':')
        .ok_or_else(|| format!("'{content}' is not ENC:TEXT"))?;
    let encoding = match enc {
        "raw" => ContentEncoding::Raw,
        "hex" => ContentEncoding::Hex,
        "base64" => ContentEncoding::Base64,
        "esc" => ContentEncoding::Escaped,
        other => Err(format!(
            "unknown encoding '{other}', expected raw, hex, base64 or esc"
        ))?,
    };
    Ok((Some(text.to_owned()), encoding))
}

pub fn parse_check_target(input: &str) -> Result<(String, u16), String> {
    let (host, port) = input
        .rsplit_once(':')
        .ok_or_else(|| format!("'{input}' is not HOST:PORT"))?;
    if host.is_empty() {
        return Err(format!("'{input}' is missing a host"));
    }
    Ok((host.to_owned(), parse_port(port)?))
}
