use std::net::SocketAddr;
use std::num::{NonZeroU16, NonZeroU32, NonZeroUsize};
use std::time::Duration;

use crate::error::{AppError, AppResult, ValidationError};

pub(crate) fn parse_socket_addr(s: &str) -> AppResult<SocketAddr> {
    s.trim().parse().map_err(|err| {
        AppError::validation(ValidationError::InvalidSocketAddr {
            value: s.to_owned(),
            source: err,
        })
    })
}

fn invalid_number(err: std::num::ParseIntError) -> AppError {
    AppError::validation(ValidationError::InvalidNumber { source: err })
}

fn value_too_small() -> AppError {
    AppError::validation(ValidationError::ValueTooSmall { min: 1 })
}

pub(crate) fn parse_positive_usize(s: &str) -> AppResult<NonZeroUsize> {
    let value: usize = s.trim().parse().map_err(invalid_number)?;
    NonZeroUsize::new(value).ok_or_else(value_too_small)
}

pub(crate) fn parse_positive_u32(s: &str) -> AppResult<NonZeroU32> {
    let value: u32 = s.trim().parse().map_err(invalid_number)?;
    NonZeroU32::new(value).ok_or_else(value_too_small)
}

pub(crate) fn parse_positive_u16(s: &str) -> AppResult<NonZeroU16> {
    let value: u16 = s.trim().parse().map_err(invalid_number)?;
    NonZeroU16::new(value).ok_or_else(value_too_small)
}

/// Parses `<number>[ms|s|m|h]`; a bare number is seconds.
pub(crate) fn parse_duration_arg(s: &str) -> AppResult<Duration> {
    parse_duration(s).map_err(AppError::validation)
}

pub(crate) fn parse_duration(s: &str) -> Result<Duration, ValidationError> {
    let value = s.trim();
    if value.is_empty() {
        return Err(ValidationError::DurationEmpty);
    }

    let digits_len = value.chars().take_while(char::is_ascii_digit).count();
    if digits_len == 0 {
        return Err(ValidationError::InvalidDurationFormat {
            value: value.to_owned(),
        });
    }
    let (num_part, unit_part) = value.split_at(digits_len);
    let number: u64 =
        num_part
            .parse()
            .map_err(|err| ValidationError::InvalidDurationNumber {
                value: value.to_owned(),
                source: err,
            })?;

    let seconds_per_unit = match unit_part {
        "ms" => None,
        "" | "s" => Some(1),
        "m" => Some(60),
        "h" => Some(3600),
        unit => {
            return Err(ValidationError::InvalidDurationUnit {
                unit: unit.to_owned(),
            });
        }
    };
    let duration = match seconds_per_unit {
        None => Duration::from_millis(number),
        Some(factor) => Duration::from_secs(
            number
                .checked_mul(factor)
                .ok_or(ValidationError::DurationOverflow)?,
        ),
    };

    if duration.is_zero() {
        return Err(ValidationError::DurationZero);
    }

    Ok(duration)
}
