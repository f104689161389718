//! Typed packets of the Wialon IPS dialect.
//!
//! | Tag     | Body                                                              |
//! |---------|-------------------------------------------------------------------|
//! | `L`     | `identifier[;password]`                                           |
//! | `SD`    | `date;time;lat;N|S;lon;E|W;speed;course;altitude;sats`            |
//! | `D`     | SD body `;inputs;in_mask;out_mask;adc;ibutton[;alarm];params`     |
//! | `ASD`   | `record_id`                                                       |
//!
//! `params` is a comma-separated list of `name:type:value` triplets.

use crate::error::ProtocolError;
use crate::frame::{RawFrame, FIELD_SEPARATOR, TYPE_DELIMITER};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of body fields in a short data packet.
pub const SHORT_DATA_FIELDS: usize = 10;

/// Body field count of an extended data packet without an alarm status field.
pub const EXTENDED_DATA_FIELDS: usize = SHORT_DATA_FIELDS + 6;

/// Body field count of an extended data packet carrying an alarm status field.
pub const EXTENDED_DATA_FIELDS_WITH_ALARM: usize = EXTENDED_DATA_FIELDS + 1;

/// Custom parameter type code for integer values.
pub const PARAM_TYPE_INT: i32 = 1;
/// Custom parameter type code for floating point values.
pub const PARAM_TYPE_FLOAT: i32 = 2;
/// Custom parameter type code for text values.
pub const PARAM_TYPE_TEXT: i32 = 3;

/// Packet kinds accepted from devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketType {
    Login,
    ShortData,
    ExtendedData,
    ArchiveAck,
}

impl PacketType {
    /// Resolves a wire tag (`L`, `SD`, `D`, `ASD`).
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "L" => Some(PacketType::Login),
            "SD" => Some(PacketType::ShortData),
            "D" => Some(PacketType::ExtendedData),
            "ASD" => Some(PacketType::ArchiveAck),
            _ => None,
        }
    }

    /// Returns the wire tag.
    pub fn tag(&self) -> &'static str {
        match self {
            PacketType::Login => "L",
            PacketType::ShortData => "SD",
            PacketType::ExtendedData => "D",
            PacketType::ArchiveAck => "ASD",
        }
    }

    /// Returns a label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketType::Login => "login",
            PacketType::ShortData => "short_data",
            PacketType::ExtendedData => "extended_data",
            PacketType::ArchiveAck => "archive_ack",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hemisphere letter attached to a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hemisphere {
    #[serde(rename = "N")]
    North,
    #[serde(rename = "S")]
    South,
    #[serde(rename = "E")]
    East,
    #[serde(rename = "W")]
    West,
}

impl Hemisphere {
    pub fn letter(&self) -> char {
        match self {
            Hemisphere::North => 'N',
            Hemisphere::South => 'S',
            Hemisphere::East => 'E',
            Hemisphere::West => 'W',
        }
    }

    /// South and West lie on the negative side of the axis.
    pub fn is_negative(&self) -> bool {
        matches!(self, Hemisphere::South | Hemisphere::West)
    }
}

/// A latitude or longitude as reported by the device.
///
/// `value` is the wire number scaled by 1/100, so `5355.09260;N` becomes
/// `53.550926` north. The integer part is whole degrees and the fractional
/// part carries the minutes digits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub value: f64,
    pub hemisphere: Hemisphere,
}

impl Coordinate {
    /// Returns the value negated for the southern and western hemispheres.
    pub fn signed(&self) -> f64 {
        if self.hemisphere.is_negative() {
            -self.value
        } else {
            self.value
        }
    }

    /// Converts the degrees-and-minutes reading into signed decimal degrees.
    pub fn decimal_degrees(&self) -> f64 {
        let degrees = self.value.trunc();
        let minutes = (self.value - degrees) * 100.0;
        let magnitude = degrees + minutes / 60.0;
        if self.hemisphere.is_negative() {
            -magnitude
        } else {
            magnitude
        }
    }
}

/// Position fix shared by short and extended data packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortData {
    pub timestamp: NaiveDateTime,
    pub latitude: Coordinate,
    pub longitude: Coordinate,
    /// Speed in km/h.
    pub speed: u32,
    /// Course in degrees, 0..360.
    pub course: u32,
    /// Altitude in meters.
    pub altitude: u32,
    pub satellites: u32,
}

/// Extended data packet: a position fix plus I/O state and custom parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedData {
    pub position: ShortData,
    pub input_count: u32,
    pub input_mask: u32,
    pub output_mask: u32,
    /// Analog readings as sent (comma-separated), absent when empty.
    pub adc: Option<String>,
    pub ibutton: Option<String>,
    pub alarm_status: Option<String>,
    pub custom_params: Vec<CustomParameter>,
}

/// A `name:type:value` entry of an extended data packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomParameter {
    pub name: String,
    pub type_code: i32,
    pub value: String,
}

/// A custom parameter value interpreted by its type code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl CustomParameter {
    pub fn new(name: impl Into<String>, type_code: i32, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_code,
            value: value.into(),
        }
    }

    /// Interprets the value by type code; unknown codes and unparsable
    /// numbers fall back to text.
    pub fn typed_value(&self) -> ParamValue {
        match self.type_code {
            PARAM_TYPE_INT => match self.value.parse() {
                Ok(n) => ParamValue::Int(n),
                Err(_) => ParamValue::Text(self.value.clone()),
            },
            PARAM_TYPE_FLOAT => match self.value.parse() {
                Ok(x) => ParamValue::Float(x),
                Err(_) => ParamValue::Text(self.value.clone()),
            },
            _ => ParamValue::Text(self.value.clone()),
        }
    }
}

/// A decoded device packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Login {
        identifier: String,
        password: Option<String>,
    },
    ShortData(ShortData),
    ExtendedData(ExtendedData),
    /// Resend confirmation request for an archived record.
    ArchiveAck {
        record_id: u64,
    },
}

impl Packet {
    /// Parses a frame into a packet.
    pub fn parse(frame: &RawFrame) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(frame.as_bytes())
            .map_err(|_| ProtocolError::frame("frame is not valid UTF-8"))?;
        text.parse()
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Login { .. } => PacketType::Login,
            Packet::ShortData(_) => PacketType::ShortData,
            Packet::ExtendedData(_) => PacketType::ExtendedData,
            Packet::ArchiveAck { .. } => PacketType::ArchiveAck,
        }
    }
}

impl FromStr for Packet {
    type Err = ProtocolError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let rest = text
            .strip_prefix(TYPE_DELIMITER)
            .ok_or_else(|| ProtocolError::frame("frame does not start with '#'"))?;
        let (tag, body) = rest
            .split_once(TYPE_DELIMITER)
            .ok_or_else(|| ProtocolError::frame("missing packet type delimiter"))?;
        let packet_type = PacketType::from_tag(tag)
            .ok_or_else(|| ProtocolError::UnknownPacketType(tag.to_string()))?;

        let fields: Vec<&str> = body.split(FIELD_SEPARATOR).collect();

        match packet_type {
            PacketType::Login => parse_login(&fields),
            PacketType::ShortData => {
                expect_fields(&fields, &[SHORT_DATA_FIELDS])?;
                Ok(Packet::ShortData(parse_short_data(&fields)?))
            }
            PacketType::ExtendedData => Ok(Packet::ExtendedData(parse_extended_data(&fields)?)),
            PacketType::ArchiveAck => {
                expect_fields(&fields, &[1])?;
                let record_id = parse_number(&fields, 0, "record id")?;
                Ok(Packet::ArchiveAck { record_id })
            }
        }
    }
}

/// Renders the wire form without the terminator.
impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{d}{}{d}", self.packet_type().tag(), d = TYPE_DELIMITER)?;
        match self {
            Packet::Login {
                identifier,
                password,
            } => {
                write!(f, "{}", identifier)?;
                if let Some(password) = password {
                    write!(f, ";{}", password)?;
                }
                Ok(())
            }
            Packet::ShortData(data) => write!(f, "{}", data),
            Packet::ExtendedData(data) => write!(f, "{}", data),
            Packet::ArchiveAck { record_id } => write!(f, "{}", record_id),
        }
    }
}

impl fmt::Display for ShortData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{:010.5};{};{:011.5};{};{};{};{};{}",
            self.timestamp.format("%d%m%y;%H%M%S"),
            self.latitude.value * 100.0,
            self.latitude.hemisphere.letter(),
            self.longitude.value * 100.0,
            self.longitude.hemisphere.letter(),
            self.speed,
            self.course,
            self.altitude,
            self.satellites
        )
    }
}

impl fmt::Display for ExtendedData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{};{};{};{};",
            self.position,
            self.input_count,
            self.input_mask,
            self.output_mask,
            self.adc.as_deref().unwrap_or(""),
            self.ibutton.as_deref().unwrap_or("")
        )?;
        if let Some(alarm) = &self.alarm_status {
            write!(f, "{};", alarm)?;
        }
        for (i, param) in self.custom_params.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}:{}", param.name, param.type_code, param.value)?;
        }
        Ok(())
    }
}

fn expect_fields(fields: &[&str], allowed: &[usize]) -> Result<(), ProtocolError> {
    if allowed.contains(&fields.len()) {
        return Ok(());
    }
    let expected = allowed
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(" or ");
    Err(ProtocolError::frame(format!(
        "expected {} fields, got {}",
        expected,
        fields.len()
    )))
}

fn parse_login(fields: &[&str]) -> Result<Packet, ProtocolError> {
    expect_fields(fields, &[1, 2])?;
    if fields[0].is_empty() {
        return Err(ProtocolError::field(0, "empty identifier"));
    }
    Ok(Packet::Login {
        identifier: fields[0].to_string(),
        password: fields.get(1).map(|p| p.to_string()),
    })
}

fn parse_short_data(fields: &[&str]) -> Result<ShortData, ProtocolError> {
    let date = parse_six_digits(fields, 0, "date")?;
    let time = parse_six_digits(fields, 1, "time")?;

    let date = NaiveDate::from_ymd_opt(2000 + date[2] as i32, date[1], date[0])
        .ok_or_else(|| ProtocolError::field(0, format!("invalid date {:?}", fields[0])))?;
    let time = NaiveTime::from_hms_opt(time[0], time[1], time[2])
        .ok_or_else(|| ProtocolError::field(1, format!("invalid time {:?}", fields[1])))?;

    let latitude = parse_coordinate(fields, 2, 90.0, [Hemisphere::North, Hemisphere::South])?;
    let longitude = parse_coordinate(fields, 4, 180.0, [Hemisphere::East, Hemisphere::West])?;

    let speed = parse_number(fields, 6, "speed")?;
    let course: u32 = parse_number(fields, 7, "course")?;
    if course >= 360 {
        return Err(ProtocolError::field(
            7,
            format!("course {} out of range 0..360", course),
        ));
    }

    Ok(ShortData {
        timestamp: NaiveDateTime::new(date, time),
        latitude,
        longitude,
        speed,
        course,
        altitude: parse_number(fields, 8, "altitude")?,
        satellites: parse_number(fields, 9, "satellite count")?,
    })
}

fn parse_extended_data(fields: &[&str]) -> Result<ExtendedData, ProtocolError> {
    expect_fields(
        fields,
        &[EXTENDED_DATA_FIELDS, EXTENDED_DATA_FIELDS_WITH_ALARM],
    )?;

    let position = parse_short_data(&fields[..SHORT_DATA_FIELDS])?;
    let alarm_status = if fields.len() == EXTENDED_DATA_FIELDS_WITH_ALARM {
        optional_text(fields[15])
    } else {
        None
    };
    let params_field = fields[fields.len() - 1];

    Ok(ExtendedData {
        position,
        input_count: parse_number(fields, 10, "input count")?,
        input_mask: parse_number(fields, 11, "input mask")?,
        output_mask: parse_number(fields, 12, "output mask")?,
        adc: optional_text(fields[13]),
        ibutton: optional_text(fields[14]),
        alarm_status,
        custom_params: parse_custom_params(params_field)?,
    })
}

/// Parses the custom parameter list. One bad triplet rejects the whole list.
pub fn parse_custom_params(field: &str) -> Result<Vec<CustomParameter>, ProtocolError> {
    if field.is_empty() {
        return Ok(Vec::new());
    }

    field
        .split(',')
        .enumerate()
        .map(|(index, raw)| {
            let malformed = || ProtocolError::MalformedCustomParameter {
                index,
                raw: raw.to_string(),
            };
            let parts: Vec<&str> = raw.split(':').collect();
            if parts.len() != 3 || parts[0].is_empty() {
                return Err(malformed());
            }
            let type_code = parts[1].parse().map_err(|_| malformed())?;
            Ok(CustomParameter::new(parts[0], type_code, parts[2]))
        })
        .collect()
}

fn optional_text(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

fn parse_number<T: FromStr>(
    fields: &[&str],
    index: usize,
    name: &str,
) -> Result<T, ProtocolError> {
    fields[index]
        .parse()
        .map_err(|_| ProtocolError::field(index, format!("invalid {} {:?}", name, fields[index])))
}

fn parse_six_digits(fields: &[&str], index: usize, name: &str) -> Result<[u32; 3], ProtocolError> {
    let field = fields[index];
    if field.len() != 6 || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::field(
            index,
            format!("{} must be 6 digits, got {:?}", name, field),
        ));
    }
    let digits = field.as_bytes();
    let pair = |i: usize| u32::from(digits[i] - b'0') * 10 + u32::from(digits[i + 1] - b'0');
    Ok([pair(0), pair(2), pair(4)])
}

fn parse_coordinate(
    fields: &[&str],
    index: usize,
    max: f64,
    allowed: [Hemisphere; 2],
) -> Result<Coordinate, ProtocolError> {
    let raw: f64 = parse_number(fields, index, "coordinate")?;
    if !raw.is_finite() || raw < 0.0 {
        return Err(ProtocolError::field(
            index,
            format!("coordinate {:?} must be a non-negative number", fields[index]),
        ));
    }
    let value = raw / 100.0;
    if value > max {
        return Err(ProtocolError::field(
            index,
            format!("coordinate {} exceeds {}", value, max),
        ));
    }

    let letter = fields[index + 1];
    let hemisphere = allowed
        .into_iter()
        .find(|h| letter.len() == 1 && letter.starts_with(h.letter()))
        .ok_or_else(|| {
            ProtocolError::field(index + 1, format!("invalid hemisphere {:?}", letter))
        })?;

    Ok(Coordinate { value, hemisphere })
}
