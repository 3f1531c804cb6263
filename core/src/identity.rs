//! Identity resolution: normalized email → user row.
//!
//! Get-or-create runs inside a unit of work, so two first-interactions for
//! the same email (webhook + login racing) resolve to one user.

use crate::{
    error::{LedgerError, LedgerResult},
    rng::ReferralCodeGenerator,
    store::{LedgerReader, UnitOfWork, UserRow},
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Referral code collisions retried before giving up.
const MAX_CODE_ATTEMPTS: u32 = 8;

/// Trim and lowercase. Rejects strings that cannot be an address.
pub fn normalize_email(raw: &str) -> LedgerResult<String> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(LedgerError::InvalidEmail { email: raw.to_string() });
    }
    Ok(email)
}

/// Returns the user and whether it was created by this call.
pub fn get_or_create(
    uow: &UnitOfWork<'_>,
    codes: &ReferralCodeGenerator,
    email: &str,
    now: DateTime<Utc>,
) -> LedgerResult<(UserRow, bool)> {
    if let Some(existing) = uow.user_by_email(email)? {
        return Ok((existing, false));
    }

    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let user_id = Uuid::new_v4().to_string();
        let code = codes.generate();
        if uow.insert_user_if_absent(&user_id, email, &code, now)? {
            let user = uow
                .user(&user_id)?
                .ok_or_else(|| LedgerError::NotFound { user_id: user_id.clone() })?;
            return Ok((user, true));
        }
        if let Some(existing) = uow.user_by_email(email)? {
            return Ok((existing, false));
        }
        log::debug!("identity: referral code collision on attempt {attempt}");
    }

    Err(LedgerError::ReferralCodeExhausted { attempts: MAX_CODE_ATTEMPTS })
}
