//! Legacy flat cache format.
//!
//! An older on-disk cache stored one record per grant as a fixed sequence of
//! length-prefixed fields. This module reads and writes that format for
//! interoperability. Field order per record:
//!
//! 1. user: 4-byte length + UTF-8 bytes
//! 2. 16-byte binary address structure (AF_INET sockaddr layout: family,
//!    zero port, 4 address octets in network order, 8 zero bytes)
//! 3. 4-byte signed netmask
//! 4. database scope: 4-byte signed length where -1 means "no database grant
//!    at all" and any non-negative length (0 included) a present string
//! 5. credential: 4-byte length + hex digest bytes
//!
//! Integers are little-endian. A short read on any field or payload is a
//! hard failure, never a partial parse.

use std::io::{Read, Write};
use std::net::Ipv4Addr;

use crate::error::{AuthCacheError, Result};
use crate::grants::{DatabaseScope, GrantRecord, MAX_DATABASE_LEN, MAX_USER_LEN};
use crate::host::HostPattern;
use crate::snapshot::Snapshot;

const AF_INET: u16 = 2;
const ADDRESS_BLOB_LEN: usize = 16;
const MAX_CREDENTIAL_LEN: usize = 256;

/// Write every representable record of a snapshot.
///
/// Literal host patterns have no field in this format and are skipped with a
/// diagnostic. Returns the number of records written.
pub fn write_snapshot<W: Write>(writer: &mut W, snapshot: &Snapshot) -> Result<usize> {
    let mut written = 0;
    for grant in snapshot.iter() {
        if write_record(writer, grant)? {
            written += 1;
        }
    }
    Ok(written)
}

fn write_record<W: Write>(writer: &mut W, grant: &GrantRecord) -> Result<bool> {
    let (address, netmask) = match &grant.host {
        HostPattern::Any => (Ipv4Addr::UNSPECIFIED, 0i32),
        HostPattern::Network { address, prefix } => (*address, i32::from(*prefix)),
        HostPattern::Literal(pattern) => {
            debug!(
                "Skipping grant '{}'@'{}': literal pattern '{}' has no flat-format representation",
                grant.user, grant.host_raw, pattern
            );
            return Ok(false);
        }
    };

    write_bytes(writer, grant.user.as_bytes())?;

    let mut blob = [0u8; ADDRESS_BLOB_LEN];
    blob[0..2].copy_from_slice(&AF_INET.to_le_bytes());
    // Bytes 2..4 are the (always zero) port; 4..8 the address octets in
    // network order; the rest stays zero.
    blob[4..8].copy_from_slice(&address.octets());
    writer.write_all(&blob)?;

    writer.write_all(&netmask.to_le_bytes())?;

    match &grant.scope {
        DatabaseScope::Denied => writer.write_all(&(-1i32).to_le_bytes())?,
        DatabaseScope::Any => write_bytes(writer, b"")?,
        DatabaseScope::Exact(name) => write_bytes(writer, name.as_bytes())?,
        DatabaseScope::Pattern(pattern) => write_bytes(writer, pattern.as_bytes())?,
    }

    write_bytes(writer, grant.credential.as_deref().unwrap_or("").as_bytes())?;

    Ok(true)
}

fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    writer.write_all(&(bytes.len() as i32).to_le_bytes())?;
    writer.write_all(bytes)?;
    Ok(())
}

/// Read records until end of input.
///
/// Input must end exactly at a record boundary; anything else is a
/// [`AuthCacheError::LegacyFormat`] failure.
pub fn read_records<R: Read>(reader: &mut R) -> Result<Vec<GrantRecord>> {
    let mut records = Vec::new();
    while let Some(record) = read_record(reader)? {
        records.push(record);
    }
    Ok(records)
}

fn read_record<R: Read>(reader: &mut R) -> Result<Option<GrantRecord>> {
    // Clean EOF before the first field is the end of the stream; EOF
    // anywhere later truncates the record.
    let user_len = match read_i32_at_boundary(reader)? {
        Some(len) => len,
        None => return Ok(None),
    };
    let user = read_sized_string(reader, user_len, "user", MAX_USER_LEN)?;

    let mut blob = [0u8; ADDRESS_BLOB_LEN];
    read_exact(reader, &mut blob)?;
    let family = u16::from_le_bytes([blob[0], blob[1]]);
    if family != AF_INET {
        return Err(AuthCacheError::LegacyFormat(format!(
            "unsupported address family {family}"
        )));
    }
    let address = Ipv4Addr::new(blob[4], blob[5], blob[6], blob[7]);

    let netmask = read_i32(reader)?;
    let host = match netmask {
        0 => HostPattern::Any,
        8 | 16 | 24 | 32 => HostPattern::Network {
            address,
            prefix: netmask as u8,
        },
        _ => {
            return Err(AuthCacheError::LegacyFormat(format!(
                "invalid netmask {netmask}"
            )))
        }
    };

    let scope = match read_i32(reader)? {
        -1 => DatabaseScope::Denied,
        len => match read_sized_string(reader, len, "database", MAX_DATABASE_LEN)?.as_str() {
            "" => DatabaseScope::Any,
            db if db.contains('%') => DatabaseScope::Pattern(db.to_string()),
            db => DatabaseScope::Exact(db.to_string()),
        },
    };

    let credential_len = read_i32(reader)?;
    let credential = match read_sized_string(reader, credential_len, "credential", MAX_CREDENTIAL_LEN)? {
        ref c if c.is_empty() => None,
        c => Some(c),
    };

    let host_raw = host.to_string();
    Ok(Some(GrantRecord {
        user,
        host,
        host_raw,
        scope,
        credential,
    }))
}

fn read_sized_string<R: Read>(
    reader: &mut R,
    len: i32,
    field: &str,
    max: usize,
) -> Result<String> {
    if len < 0 || len as usize > max {
        return Err(AuthCacheError::LegacyFormat(format!(
            "invalid {field} length {len}"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    read_exact(reader, &mut buf)?;
    String::from_utf8(buf)
        .map_err(|_| AuthCacheError::LegacyFormat(format!("{field} is not valid UTF-8")))
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader
        .read_exact(buf)
        .map_err(|_| AuthCacheError::LegacyFormat("truncated record".to_string()))
}

/// Like [`read_i32`], but a clean EOF before any byte reads as `None`.
fn read_i32_at_boundary<R: Read>(reader: &mut R) -> Result<Option<i32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .map_err(AuthCacheError::Io)?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(AuthCacheError::LegacyFormat(
                    "truncated record".to_string(),
                ))
            };
        }
        filled += n;
    }
    Ok(Some(i32::from_le_bytes(buf)))
}
