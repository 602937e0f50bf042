use crate::util::Buf;
use gssapi_sys::{
    gss_OID_desc, gss_display_status, OM_uint32, GSS_C_CALLING_ERROR_OFFSET, GSS_C_GSS_CODE,
    GSS_C_MECH_CODE, GSS_C_ROUTINE_ERROR_OFFSET, GSS_C_SUPPLEMENTARY_OFFSET, GSS_S_COMPLETE,
    _GSS_C_CALLING_ERROR_MASK, _GSS_C_ROUTINE_ERROR_MASK, _GSS_C_SUPPLEMENTARY_MASK,
};
use std::{error, fmt, mem, ptr};

/// Mask off the supplementary bits, leaving only the calling and
/// routine error fields. Non zero means the call failed.
pub(crate) fn gss_error(x: OM_uint32) -> OM_uint32 {
    x & ((_GSS_C_CALLING_ERROR_MASK << GSS_C_CALLING_ERROR_OFFSET)
        | (_GSS_C_ROUTINE_ERROR_MASK << GSS_C_ROUTINE_ERROR_OFFSET))
}

bitflags::bitflags! {
    /// Informatory bits that may accompany a successful or failed call
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Supplementary: u32 {
        const GSS_S_CONTINUE_NEEDED = 1 << 0;
        const GSS_S_DUPLICATE_TOKEN = 1 << 1;
        const GSS_S_OLD_TOKEN = 1 << 2;
        const GSS_S_UNSEQ_TOKEN = 1 << 3;
        const GSS_S_GAP_TOKEN = 1 << 4;
    }
}

/// Errors in the way the routine was called, as opposed to errors
/// reported by the mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingError {
    InaccessibleRead,
    InaccessibleWrite,
    BadStructure,
}

impl CallingError {
    fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(CallingError::InaccessibleRead),
            2 => Some(CallingError::InaccessibleWrite),
            3 => Some(CallingError::BadStructure),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallingError::InaccessibleRead => "GSS_S_CALL_INACCESSIBLE_READ",
            CallingError::InaccessibleWrite => "GSS_S_CALL_INACCESSIBLE_WRITE",
            CallingError::BadStructure => "GSS_S_CALL_BAD_STRUCTURE",
        }
    }
}

/// The routine error field of a major status (RFC 2744 section 3.9.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutineError {
    BadMech = 1,
    BadName = 2,
    BadNameType = 3,
    BadBindings = 4,
    BadStatus = 5,
    BadSig = 6,
    NoCred = 7,
    NoContext = 8,
    DefectiveToken = 9,
    DefectiveCredential = 10,
    CredentialsExpired = 11,
    ContextExpired = 12,
    Failure = 13,
    BadQop = 14,
    Unauthorized = 15,
    Unavailable = 16,
    DuplicateElement = 17,
    NameNotMn = 18,
}

impl RoutineError {
    fn from_code(code: u32) -> Option<Self> {
        use RoutineError::*;
        let e = match code {
            1 => BadMech,
            2 => BadName,
            3 => BadNameType,
            4 => BadBindings,
            5 => BadStatus,
            6 => BadSig,
            7 => NoCred,
            8 => NoContext,
            9 => DefectiveToken,
            10 => DefectiveCredential,
            11 => CredentialsExpired,
            12 => ContextExpired,
            13 => Failure,
            14 => BadQop,
            15 => Unauthorized,
            16 => Unavailable,
            17 => DuplicateElement,
            18 => NameNotMn,
            _ => return None,
        };
        Some(e)
    }

    /// The major status value carrying just this routine error
    pub fn to_major(self) -> u32 {
        (self as u32) << GSS_C_ROUTINE_ERROR_OFFSET
    }

    pub fn name(&self) -> &'static str {
        use RoutineError::*;
        match self {
            BadMech => "GSS_S_BAD_MECH",
            BadName => "GSS_S_BAD_NAME",
            BadNameType => "GSS_S_BAD_NAMETYPE",
            BadBindings => "GSS_S_BAD_BINDINGS",
            BadStatus => "GSS_S_BAD_STATUS",
            BadSig => "GSS_S_BAD_SIG",
            NoCred => "GSS_S_NO_CRED",
            NoContext => "GSS_S_NO_CONTEXT",
            DefectiveToken => "GSS_S_DEFECTIVE_TOKEN",
            DefectiveCredential => "GSS_S_DEFECTIVE_CREDENTIAL",
            CredentialsExpired => "GSS_S_CREDENTIALS_EXPIRED",
            ContextExpired => "GSS_S_CONTEXT_EXPIRED",
            Failure => "GSS_S_FAILURE",
            BadQop => "GSS_S_BAD_QOP",
            Unauthorized => "GSS_S_UNAUTHORIZED",
            Unavailable => "GSS_S_UNAVAILABLE",
            DuplicateElement => "GSS_S_DUPLICATE_ELEMENT",
            NameNotMn => "GSS_S_NAME_NOT_MN",
        }
    }
}

impl fmt::Display for RoutineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A gssapi status pair. `major` is the GSS level status, `minor`
/// is specific to the mechanism that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Error {
    pub major: u32,
    pub minor: u32,
}

impl From<RoutineError> for Error {
    fn from(e: RoutineError) -> Self {
        Error {
            major: e.to_major(),
            minor: 0,
        }
    }
}

impl Error {
    pub fn calling_error(&self) -> Option<CallingError> {
        CallingError::from_code(
            (self.major >> GSS_C_CALLING_ERROR_OFFSET) & _GSS_C_CALLING_ERROR_MASK,
        )
    }

    pub fn routine_error(&self) -> Option<RoutineError> {
        RoutineError::from_code(
            (self.major >> GSS_C_ROUTINE_ERROR_OFFSET) & _GSS_C_ROUTINE_ERROR_MASK,
        )
    }

    pub fn supplementary(&self) -> Supplementary {
        Supplementary::from_bits_truncate(
            (self.major >> GSS_C_SUPPLEMENTARY_OFFSET) & _GSS_C_SUPPLEMENTARY_MASK,
        )
    }

    // One line per message, with no newline after the last
    fn fmt_code(
        f: &mut fmt::Formatter<'_>,
        first: &mut bool,
        code: u32,
        status_type: u32,
        name: &str,
    ) -> fmt::Result {
        let mut message_context: OM_uint32 = 0;
        loop {
            let mut minor = GSS_S_COMPLETE as OM_uint32;
            let mut buf = Buf::empty();
            let major = unsafe {
                gss_display_status(
                    &mut minor as *mut OM_uint32,
                    code,
                    status_type as i32,
                    ptr::null_mut::<gss_OID_desc>(),
                    &mut message_context as *mut OM_uint32,
                    buf.to_c(),
                )
            };
            if !mem::take(first) {
                f.write_str("\n")?;
            }
            if major == GSS_S_COMPLETE {
                write!(f, "gssapi {} error {}", name, String::from_utf8_lossy(&buf))?;
            } else {
                write!(f, "gssapi unknown {} error code {}", name, code)?;
                break;
            }
            if message_context == 0 {
                break;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        Error::fmt_code(f, &mut first, self.major, GSS_C_GSS_CODE, "major")?;
        if self.minor != 0 {
            Error::fmt_code(f, &mut first, self.minor, GSS_C_MECH_CODE, "minor")?;
        }
        Ok(())
    }
}

impl error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_is_detected_regardless_of_supplementary_bits() {
        let major = RoutineError::DefectiveToken.to_major() | 1;
        assert_ne!(gss_error(major), 0);
        assert_eq!(gss_error(1), 0);
        assert_eq!(gss_error(GSS_S_COMPLETE), 0);
    }

    #[test]
    fn major_status_decomposes_into_fields() {
        let e = Error {
            major: (1 << GSS_C_CALLING_ERROR_OFFSET)
                | RoutineError::BadName.to_major()
                | Supplementary::GSS_S_OLD_TOKEN.bits(),
            minor: 0,
        };
        assert_eq!(e.calling_error(), Some(CallingError::InaccessibleRead));
        assert_eq!(e.routine_error(), Some(RoutineError::BadName));
        assert_eq!(e.supplementary(), Supplementary::GSS_S_OLD_TOKEN);
    }

    #[test]
    fn routine_error_names_follow_the_header() {
        assert_eq!(RoutineError::Failure.to_major(), 13 << 16);
        assert_eq!(RoutineError::NameNotMn.name(), "GSS_S_NAME_NOT_MN");
        let e = Error::from(RoutineError::NoContext);
        assert_eq!(e.major, 8 << 16);
        assert_eq!(e.routine_error().map(|r| r.to_string()).as_deref(), Some("GSS_S_NO_CONTEXT"));
        assert_eq!(Error { major: 19 << 16, minor: 0 }.routine_error(), None);
    }

    #[test]
    fn display_asks_the_library_for_text() {
        let s = Error::from(RoutineError::BadName).to_string();
        assert!(s.starts_with("gssapi major error"), "{}", s);
        assert!(!s.contains("minor"), "{}", s);
        assert!(!s.ends_with('\n'), "{:?}", s);
    }

    #[test]
    fn minor_status_is_rendered_as_a_mech_code() {
        // KRB5_FCC_NOFILE, "No credentials cache found"
        let e = Error { major: RoutineError::NoCred.to_major(), minor: 2529639107 };
        let s = e.to_string();
        let lines = s.lines().collect::<Vec<_>>();
        assert!(lines.len() >= 2, "{:?}", s);
        assert!(lines[0].starts_with("gssapi major error"), "{:?}", s);
        assert!(lines[1..].iter().any(|l| l.contains("minor error")), "{:?}", s);
        assert!(!s.ends_with('\n'), "{:?}", s);
    }
}
