use core::fmt;

/// Errors returned by the driver entry points.
///
/// The discriminants are the flat status codes of the C-style API; success
/// (code 0) is `Ok(())`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SdmmcError {
    /// Invalid parameter
    InvalParam = 1,
    /// The device is already initialized
    Initialized = 2,
    /// GO_IDLE_STATE command error
    GoIdleState = 3,
    /// SEND_IF_COND command error
    SendIfCond = 4,
    /// IF_COND response pattern mismatch or unsupported voltage
    IfCondResp = 5,
    /// SEND_OP_COND command error
    SendOpCond = 6,
    /// Card initialization timeout
    OpCondTimeout = 7,
    /// Voltage not supported
    VoltSupport = 8,
    /// ALL_SEND_CID command error
    AllSendCid = 9,
    /// SET/SEND_RELATIVE_ADDR command error
    SetSendRca = 10,
    /// SEND_CSD command error
    SendCsd = 11,
    /// SELECT_CARD command error
    SelectCard = 12,
    /// Card is locked with a password
    Locked = 13,
    /// SEND_EXT_CSD command error
    SendExtCsd = 14,
    /// Error on switching to high speed mode
    SwitchHs = 15,
    /// SET_CLR_CARD_DETECT command error
    SetClrCd = 16,
    /// Error on switching to a different bus width
    SetBusWidth = 17,
    /// SEND_STATUS command error
    SendStatus = 18,
    /// The card returned an error via its status
    CardStatus = 19,
    /// Card uninitialized or not inserted
    NoCard = 20,
    /// Sector read/write error
    SectRw = 21,
    /// The card is write protected
    WriteProt = 22,
}

impl SdmmcError {
    /// Flat numeric status code
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Map a flat status code back to an error. `0` and unknown codes yield `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        use SdmmcError::*;
        let err = match code {
            1 => InvalParam,
            2 => Initialized,
            3 => GoIdleState,
            4 => SendIfCond,
            5 => IfCondResp,
            6 => SendOpCond,
            7 => OpCondTimeout,
            8 => VoltSupport,
            9 => AllSendCid,
            10 => SetSendRca,
            11 => SendCsd,
            12 => SelectCard,
            13 => Locked,
            14 => SendExtCsd,
            15 => SwitchHs,
            16 => SetClrCd,
            17 => SetBusWidth,
            18 => SendStatus,
            19 => CardStatus,
            20 => NoCard,
            21 => SectRw,
            22 => WriteProt,
            _ => return None,
        };
        Some(err)
    }
}

impl fmt::Display for SdmmcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SdmmcError::InvalParam => "invalid parameter",
            SdmmcError::Initialized => "device is already initialized",
            SdmmcError::GoIdleState => "GO_IDLE_STATE failed",
            SdmmcError::SendIfCond => "SEND_IF_COND failed",
            SdmmcError::IfCondResp => "SEND_IF_COND response mismatch",
            SdmmcError::SendOpCond => "SEND_OP_COND failed",
            SdmmcError::OpCondTimeout => "card did not finish power-up in time",
            SdmmcError::VoltSupport => "card does not support the host voltage",
            SdmmcError::AllSendCid => "ALL_SEND_CID failed",
            SdmmcError::SetSendRca => "SET/SEND_RELATIVE_ADDR failed",
            SdmmcError::SendCsd => "SEND_CSD failed",
            SdmmcError::SelectCard => "SELECT_CARD failed",
            SdmmcError::Locked => "card is password locked",
            SdmmcError::SendExtCsd => "SEND_EXT_CSD failed",
            SdmmcError::SwitchHs => "switching to high speed failed",
            SdmmcError::SetClrCd => "SET_CLR_CARD_DETECT failed",
            SdmmcError::SetBusWidth => "switching the bus width failed",
            SdmmcError::SendStatus => "SEND_STATUS failed",
            SdmmcError::CardStatus => "card reported an error in its status",
            SdmmcError::NoCard => "no card or card not initialized",
            SdmmcError::SectRw => "sector read/write failed",
            SdmmcError::WriteProt => "card is write protected",
        };
        write!(f, "{} (code {})", msg, self.code())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SdmmcError {}

/// Transport errors reported by a [`crate::host::Controller`].
///
/// These are raised by the host itself, never by the card's status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostError {
    /// No response within the command timeout
    CmdTimeout,
    /// CRC mismatch on the response or a data block
    Crc,
    /// Data phase timed out
    DataTimeout,
    /// FIFO overflow or underrun
    Overrun,
    /// Controller never became idle
    Busy,
    /// Any other error status, raw controller bits
    Other(u32),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::CmdTimeout => write!(f, "command response timeout"),
            HostError::Crc => write!(f, "CRC error"),
            HostError::DataTimeout => write!(f, "data timeout"),
            HostError::Overrun => write!(f, "FIFO overrun"),
            HostError::Busy => write!(f, "controller busy"),
            HostError::Other(bits) => write!(f, "controller error {:#X}", bits),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HostError {}
