use std::fmt;
use std::str::FromStr;

use crate::error::ParseErrorKind;

/// RTSP request methods (RFC 2326 §10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RtspMethod {
    Options,
    Describe,
    Announce,
    Setup,
    Play,
    Pause,
    Teardown,
    GetParameter,
    SetParameter,
    Record,
    Redirect,
}

impl RtspMethod {
    pub const ALL: [RtspMethod; 11] = [
        RtspMethod::Options,
        RtspMethod::Describe,
        RtspMethod::Announce,
        RtspMethod::Setup,
        RtspMethod::Play,
        RtspMethod::Pause,
        RtspMethod::Teardown,
        RtspMethod::GetParameter,
        RtspMethod::SetParameter,
        RtspMethod::Record,
        RtspMethod::Redirect,
    ];

    /// The method token as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Announce => "ANNOUNCE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Teardown => "TEARDOWN",
            Self::GetParameter => "GET_PARAMETER",
            Self::SetParameter => "SET_PARAMETER",
            Self::Record => "RECORD",
            Self::Redirect => "REDIRECT",
        }
    }
}

impl fmt::Display for RtspMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RtspMethod {
    type Err = ParseErrorKind;

    /// Method tokens are matched case-insensitively; servers in the wild send
    /// `Public: options, describe` as often as the upper-case form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        RtspMethod::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(token))
            .ok_or_else(|| ParseErrorKind::UnknownMethod(token.to_string()))
    }
}

/// Parse a comma-separated method list (`Public` / `Allow` headers).
///
/// Unknown tokens are skipped with a debug log rather than failing the
/// whole list.
pub fn parse_method_list(value: &str) -> Vec<RtspMethod> {
    value
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| match token.parse::<RtspMethod>() {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::debug!(token, error = %e, "ignoring unknown method in list");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("get_parameter".parse(), Ok(RtspMethod::GetParameter));
        assert_eq!(" PLAY ".parse(), Ok(RtspMethod::Play));
        assert!("FETCH".parse::<RtspMethod>().is_err());
    }

    #[test]
    fn method_list_skips_unknown() {
        let methods = parse_method_list("OPTIONS, DESCRIBE, FLY,SETUP,");
        assert_eq!(
            methods,
            vec![RtspMethod::Options, RtspMethod::Describe, RtspMethod::Setup]
        );
    }
}
