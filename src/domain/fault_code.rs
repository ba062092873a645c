/// Values that do not count as an error inside a session.
pub const SESSION_IGNORED_VALUES: &[&str] = &["", "None", "nan", "NoError"];

/// Values that do not count as an error on an idle connector.
pub const IDLE_IGNORED_VALUES: &[&str] = &["", "None", "nan", "NoError", "Available", "Preparing"];

/// Error-like values that still describe a normal end of charging.
const BENIGN_STOP_VALUES: &[&str] = &["NoError", "Local", "Remote", "UserRequestedStop", "None"];

const STOP_REASON_PREFIX: &str = "StopReason:";
const OTHER_ERROR: &str = "OtherError";

/// Sub-classes of the catch-all `OtherError` code, derived from the free
/// text that accompanies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OtherErrorKind {
    VehicleProtocol,
    CommunicationTimeout,
    OverCurrent,
    UnderVoltage,
    Disconnection,
    Internal,
    Unclassified,
}

impl OtherErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::VehicleProtocol => "OtherError:VehicleProtocolError",
            Self::CommunicationTimeout => "OtherError:CommunicationTimeout",
            Self::OverCurrent => "OtherError:OverCurrentDetected",
            Self::UnderVoltage => "OtherError:UnderVoltage",
            Self::Disconnection => "OtherError:Disconnection",
            Self::Internal => "OtherError:InternalError",
            Self::Unclassified => "OtherError:Unclassified",
        }
    }

    /// First matching pattern wins; lookup is case-insensitive over `info`
    /// and `vendorErrorCode` together.
    pub fn classify(info: Option<&str>, vendor_error_code: Option<&str>) -> Self {
        let haystack = [info, vendor_error_code]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        OTHER_ERROR_PATTERNS
            .iter()
            .find(|(_, needles)| needles.iter().any(|needle| haystack.contains(needle)))
            .map(|(kind, _)| *kind)
            .unwrap_or(Self::Unclassified)
    }
}

const OTHER_ERROR_PATTERNS: &[(OtherErrorKind, &[&str])] = &[
    (
        OtherErrorKind::VehicleProtocol,
        &["iso15118", "iso 15118", "din70121", "din 70121", "slac", "v2g", "control pilot", "cp state", "vehicle"],
    ),
    (
        OtherErrorKind::CommunicationTimeout,
        &["timeout", "time out", "timed out", "no response", "communication", "offline"],
    ),
    (
        OtherErrorKind::OverCurrent,
        &["overcurrent", "over current", "over-current", "over_current"],
    ),
    (
        OtherErrorKind::UnderVoltage,
        &["undervoltage", "under voltage", "under-voltage", "under_voltage", "low voltage"],
    ),
    (
        OtherErrorKind::Disconnection,
        &["disconnect", "unplug", "cable removed", "plug removed"],
    ),
    (
        OtherErrorKind::Internal,
        &["internal", "firmware", "hardware", "relay", "contactor", "memory"],
    ),
];

pub fn is_ignored(value: &str, ignored: &[&str]) -> bool {
    let value = value.trim();
    ignored
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(value))
}

pub fn is_other_error(label: &str) -> bool {
    label == OTHER_ERROR || label.starts_with("OtherError:")
}

/// The reported label for an `errorCode`; `OtherError` gains a sub-class.
pub fn error_code_label(
    error_code: &str,
    info: Option<&str>,
    vendor_error_code: Option<&str>,
) -> String {
    if error_code.trim() == OTHER_ERROR {
        OtherErrorKind::classify(info, vendor_error_code)
            .label()
            .to_string()
    } else {
        error_code.trim().to_string()
    }
}

/// True when an error-list value describes something other than a normal stop.
pub fn is_real_error(value: &str) -> bool {
    let value = value.trim();
    let value = value.strip_prefix(STOP_REASON_PREFIX).map_or(value, str::trim);
    !is_ignored(value, BENIGN_STOP_VALUES) && !value.is_empty()
}

pub fn stop_reason_label(value: &str) -> String {
    format!("{STOP_REASON_PREFIX}{}", value.trim())
}
