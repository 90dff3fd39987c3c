//! Author/committer signature lines (`author Name <email> <unix-ts> <tz>`).

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;

use crate::errors::EngineError;

/// Whether a signature line is the author or the committer line.
#[derive(Eq, Debug, Clone, Copy, PartialEq)]
pub enum SignatureType {
    Author,
    Committer,
}

impl SignatureType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SignatureType::Author => "author",
            SignatureType::Committer => "committer",
        }
    }
}

impl FromStr for SignatureType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "author" => Ok(SignatureType::Author),
            "committer" => Ok(SignatureType::Committer),
            _ => Err(EngineError::InvalidSignature(s.to_string())),
        }
    }
}

/// One signature line of a commit object.
#[derive(Eq, Debug, Clone, PartialEq)]
pub struct Signature {
    pub signature_type: SignatureType,
    pub name: String,
    pub email: String,
    pub timestamp: i64,
    pub timezone: String,
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} {} <{}> {} {}",
            self.signature_type.as_str(),
            self.name,
            self.email,
            self.timestamp,
            self.timezone
        )
    }
}

impl Signature {
    /// Build a signature stamped with the current time (UTC offset).
    pub fn now(signature_type: SignatureType, name: &str, email: &str) -> Signature {
        Signature {
            signature_type,
            name: name.to_string(),
            email: email.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            timezone: "+0000".to_string(),
        }
    }

    /// Parse a raw signature line, e.g.
    /// `author benjamin <benjamin@example.com> 1757467768 +0800`.
    pub fn from_data(data: Vec<u8>) -> Result<Signature, EngineError> {
        let invalid = || EngineError::InvalidSignature(String::from_utf8_lossy(&data).to_string());

        let type_end = data.find_byte(b' ').ok_or_else(invalid)?;
        let signature_type =
            SignatureType::from_str(data[..type_end].to_str().map_err(|_| invalid())?)?;

        let email_open = data.find_byte(b'<').ok_or_else(invalid)?;
        let email_close = data.find_byte(b'>').ok_or_else(invalid)?;
        if email_open <= type_end + 1 || email_close < email_open {
            return Err(invalid());
        }

        let name = data[type_end + 1..email_open - 1]
            .to_str()
            .map_err(|_| invalid())?
            .to_string();
        let email = data[email_open + 1..email_close]
            .to_str()
            .map_err(|_| invalid())?
            .to_string();

        let rest = data[email_close + 1..]
            .to_str()
            .map_err(|_| invalid())?
            .trim();
        let mut parts = rest.split_whitespace();
        let timestamp = parts
            .next()
            .and_then(|t| t.parse::<i64>().ok())
            .ok_or_else(invalid)?;
        let timezone = parts.next().unwrap_or("+0000").to_string();

        Ok(Signature {
            signature_type,
            name,
            email,
            timestamp,
            timezone,
        })
    }

    /// Serialize back to the raw line format.
    pub fn to_data(&self) -> Result<Vec<u8>, EngineError> {
        Ok(self.to_string().into_bytes())
    }
}
