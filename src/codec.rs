// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Binary encoding of GATT payloads.
//!
//! Integers, IEEE-11073 SFLOAT/FLOAT and the 7-byte date-time used by
//! health profiles.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{Error, Result};

/// Byte order of multi-byte fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// IEEE-11073 16-bit SFLOAT special mantissas.
mod sfloat {
    pub const POSITIVE_INFINITY: i16 = 0x07fe;
    pub const NAN: i16 = 0x07ff;
    pub const NRES: i16 = 0x0800;
    pub const RESERVED: i16 = 0x0801;
    pub const NEGATIVE_INFINITY: i16 = 0x0802;
}

/// IEEE-11073 32-bit FLOAT special mantissas.
mod float {
    pub const POSITIVE_INFINITY: u32 = 0x007f_fffe;
    pub const NAN: u32 = 0x007f_ffff;
    pub const NRES: u32 = 0x0080_0000;
    pub const RESERVED: u32 = 0x0080_0001;
    pub const NEGATIVE_INFINITY: u32 = 0x0080_0002;
}

/// Sequential reader over a GATT value.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
    endianness: Endianness,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8], endianness: Endianness) -> Self {
        Self {
            bytes,
            offset: 0,
            endianness,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn set_offset(&mut self, offset: usize) -> Result<()> {
        if offset > self.bytes.len() {
            return Err(Error::invalid(format!(
                "offset {} beyond {} bytes",
                offset,
                self.bytes.len()
            )));
        }
        self.offset = offset;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::malformed(format!(
                "need {} bytes at offset {}, only {} left",
                n,
                self.offset,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    /// Read `n` bytes as an unsigned integer in the configured byte order.
    fn uint(&mut self, n: usize) -> Result<u32> {
        let bytes = self.take(n)?;
        let fold = |acc: u32, b: &u8| (acc << 8) | *b as u32;
        Ok(match self.endianness {
            Endianness::Little => bytes.iter().rev().fold(0, fold),
            Endianness::Big => bytes.iter().fold(0, fold),
        })
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(self.uint(2)? as u16)
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(self.u16()? as i16)
    }

    pub fn u24(&mut self) -> Result<u32> {
        self.uint(3)
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.uint(4)
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    pub fn bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }

    /// IEEE-11073 16-bit SFLOAT: 4-bit exponent, 12-bit mantissa.
    pub fn sfloat(&mut self) -> Result<f64> {
        let raw = self.u16()?;
        let mut mantissa = (raw & 0x0fff) as i16;
        let mut exponent = (raw >> 12) as i8;

        match mantissa {
            sfloat::POSITIVE_INFINITY => return Ok(f64::INFINITY),
            sfloat::NEGATIVE_INFINITY => return Ok(f64::NEG_INFINITY),
            sfloat::NAN | sfloat::NRES | sfloat::RESERVED => return Ok(f64::NAN),
            _ => {}
        }

        if mantissa >= 0x0800 {
            mantissa -= 0x1000;
        }
        if exponent >= 0x08 {
            exponent -= 0x10;
        }
        Ok(mantissa as f64 * 10f64.powi(exponent as i32))
    }

    /// IEEE-11073 32-bit FLOAT: 8-bit exponent, 24-bit mantissa.
    pub fn float(&mut self) -> Result<f64> {
        let raw = self.u32()?;
        let mantissa = raw & 0x00ff_ffff;
        let exponent = (raw >> 24) as i8;

        match mantissa {
            float::POSITIVE_INFINITY => return Ok(f64::INFINITY),
            float::NEGATIVE_INFINITY => return Ok(f64::NEG_INFINITY),
            float::NAN | float::NRES | float::RESERVED => return Ok(f64::NAN),
            _ => {}
        }

        let mantissa = if mantissa >= 0x0080_0000 {
            mantissa as i32 - 0x0100_0000
        } else {
            mantissa as i32
        };
        Ok(mantissa as f64 * 10f64.powi(exponent as i32))
    }

    /// 7-byte date-time: year (u16), month, day, hours, minutes, seconds.
    pub fn date_time(&mut self) -> Result<NaiveDateTime> {
        let year = self.u16()?;
        let month = self.u8()?;
        let day = self.u8()?;
        let hour = self.u8()?;
        let minute = self.u8()?;
        let second = self.u8()?;

        NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
            .and_then(|d| d.and_hms_opt(hour as u32, minute as u32, second as u32))
            .ok_or_else(|| {
                Error::malformed(format!(
                    "invalid date-time {}-{}-{} {}:{}:{}",
                    year, month, day, hour, minute, second
                ))
            })
    }
}

/// Builder for GATT values.
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    bytes: Vec<u8>,
    endianness: Endianness,
}

impl ByteWriter {
    pub fn new(endianness: Endianness) -> Self {
        Self {
            bytes: Vec::new(),
            endianness,
        }
    }

    fn uint(&mut self, value: u32, n: usize) -> &mut Self {
        let le = value.to_le_bytes();
        match self.endianness {
            Endianness::Little => self.bytes.extend_from_slice(&le[..n]),
            Endianness::Big => self.bytes.extend(le[..n].iter().rev()),
        }
        self
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.uint(value as u32, 2)
    }

    pub fn i16(&mut self, value: i16) -> &mut Self {
        self.uint(value as u16 as u32, 2)
    }

    pub fn u24(&mut self, value: u32) -> &mut Self {
        self.uint(value & 0x00ff_ffff, 3)
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.uint(value, 4)
    }

    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(value);
        self
    }

    /// Encode `mantissa * 10^exponent` as an SFLOAT.
    ///
    /// The mantissa must fit 12 signed bits without hitting a special
    /// value, and the exponent 4 signed bits.
    pub fn sfloat(&mut self, mantissa: i16, exponent: i8) -> Result<&mut Self> {
        if !(-2045..=2045).contains(&mantissa) || !(-8..=7).contains(&exponent) {
            return Err(Error::invalid(format!(
                "{}e{} does not fit an SFLOAT",
                mantissa, exponent
            )));
        }
        let raw = ((exponent as u16 & 0x0f) << 12) | (mantissa as u16 & 0x0fff);
        Ok(self.u16(raw))
    }

    /// Encode `mantissa * 10^exponent` as a FLOAT.
    ///
    /// The mantissa must fit 24 signed bits without hitting a special value.
    pub fn float(&mut self, mantissa: i32, exponent: i8) -> Result<&mut Self> {
        if !(-0x007f_fffd..=0x007f_fffd).contains(&mantissa) {
            return Err(Error::invalid(format!(
                "mantissa {} does not fit a FLOAT",
                mantissa
            )));
        }
        let raw = ((exponent as u8 as u32) << 24) | (mantissa as u32 & 0x00ff_ffff);
        Ok(self.u32(raw))
    }

    pub fn date_time(&mut self, value: &NaiveDateTime) -> &mut Self {
        self.u16(value.year() as u16)
            .u8(value.month() as u8)
            .u8(value.day() as u8)
            .u8(value.hour() as u8)
            .u8(value.minute() as u8)
            .u8(value.second() as u8)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
