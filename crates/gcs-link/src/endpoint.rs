use std::fmt;
use std::str::FromStr;

use crate::error::LinkError;

/// GCS-side port the built-in simulator talks to.
pub const SIM_LISTEN: &str = "udpin:0.0.0.0:14551";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Serial { dev: String, baud: u32 },
    UdpIn { addr: String },
    UdpOut { addr: String },
    TcpOut { addr: String },
    /// In-process simulator; the link listens on [`SIM_LISTEN`].
    Sim,
}

impl Endpoint {
    /// Address string understood by `mavlink::connect`.
    pub fn mavlink_url(&self) -> String {
        match self {
            Self::Serial { dev, baud } => format!("serial:{}:{}", dev, baud),
            Self::UdpIn { addr } => format!("udpin:{}", addr),
            Self::UdpOut { addr } => format!("udpout:{}", addr),
            Self::TcpOut { addr } => format!("tcpout:{}", addr),
            Self::Sim => SIM_LISTEN.to_string(),
        }
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, Self::Serial { .. })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sim => f.write_str("sim"),
            other => f.write_str(&other.mavlink_url()),
        }
    }
}

impl FromStr for Endpoint {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("sim") || s.eq_ignore_ascii_case("simulator") {
            return Ok(Self::Sim);
        }
        let (scheme, rest) = s.split_once(':').ok_or_else(|| LinkError::Endpoint(s.into()))?;
        let bad = || LinkError::Endpoint(s.to_string());
        match scheme {
            "serial" => {
                // device paths may contain ':' on some platforms; baud is the last field
                let (dev, baud) = rest.rsplit_once(':').ok_or_else(bad)?;
                let baud: u32 = baud.parse().map_err(|_| bad())?;
                if dev.is_empty() || baud == 0 {
                    return Err(bad());
                }
                Ok(Self::Serial { dev: dev.to_string(), baud })
            }
            "udpin" | "udpout" | "tcpout" => {
                let (host, port) = rest.rsplit_once(':').ok_or_else(bad)?;
                port.parse::<u16>().map_err(|_| bad())?;
                if host.is_empty() {
                    return Err(bad());
                }
                let addr = rest.to_string();
                Ok(match scheme {
                    "udpin" => Self::UdpIn { addr },
                    "udpout" => Self::UdpOut { addr },
                    _ => Self::TcpOut { addr },
                })
            }
            _ => Err(bad()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_forms() {
        assert_eq!(
            "serial:/dev/ttyACM0:115200".parse::<Endpoint>().unwrap(),
            Endpoint::Serial { dev: "/dev/ttyACM0".into(), baud: 115200 }
        );
        assert_eq!(
            "udpin:0.0.0.0:14550".parse::<Endpoint>().unwrap(),
            Endpoint::UdpIn { addr: "0.0.0.0:14550".into() }
        );
        assert_eq!("SIM".parse::<Endpoint>().unwrap(), Endpoint::Sim);
        assert_eq!(Endpoint::Sim.mavlink_url(), SIM_LISTEN);
    }

    #[test]
    fn windows_com_port() {
        let e: Endpoint = "serial:COM8:57600".parse().unwrap();
        assert_eq!(e.mavlink_url(), "serial:COM8:57600");
    }

    #[test]
    fn rejects_garbage() {
        for s in ["", "COM8", "serial:/dev/ttyUSB0", "serial:/dev/ttyUSB0:fast", "udpin:host", "ftp:a:1", "udpin::14550"] {
            assert!(s.parse::<Endpoint>().is_err(), "{}", s);
        }
    }
}
