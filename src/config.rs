use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Parsed form of the common configuration file: whitespace-separated `key value` lines,
/// `#`/`//` comments, unknown keys ignored.
#[derive(Debug, Clone)]
pub struct CommonConfig {
    pub number_of_preferred_neighbors: u32,
    pub unchoking_interval: Duration,
    pub optimistic_unchoking_interval: Duration,
    pub file_name: String,
    pub file_size: u64,
    pub piece_size: u32,
}

impl CommonConfig {
    pub fn num_pieces(&self) -> u32 {
        ((self.file_size + self.piece_size as u64 - 1) / self.piece_size as u64) as u32
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    fn parse(contents: &str) -> Result<Self, ConfigError> {
        let mut number_of_preferred_neighbors = None;
        let mut unchoking_interval = None;
        let mut optimistic_unchoking_interval = None;
        let mut file_name = None;
        let mut file_size = None;
        let mut piece_size = None;

        for raw_line in contents.lines() {
            let Some((key, value)) = tokenize(raw_line) else {
                continue;
            };

            match key {
                "NumberOfPreferredNeighbors" => {
                    number_of_preferred_neighbors = Some(parse_u32("NumberOfPreferredNeighbors", value)?);
                }
                "UnchokingInterval" => {
                    unchoking_interval =
                        Some(Duration::from_secs(parse_u32("UnchokingInterval", value)? as u64));
                }
                "OptimisticUnchokingInterval" => {
                    optimistic_unchoking_interval = Some(Duration::from_secs(parse_u32(
                        "OptimisticUnchokingInterval",
                        value,
                    )? as u64));
                }
                "FileName" => file_name = Some(value.to_string()),
                "FileSize" => file_size = Some(parse_u64("FileSize", value)?),
                "PieceSize" => piece_size = Some(parse_u32("PieceSize", value)?),
                _ => {} // unknown keys are ignored for forward-compatibility.
            }
        }

        Ok(Self {
            number_of_preferred_neighbors: number_of_preferred_neighbors
                .ok_or(ConfigError::MissingKey("NumberOfPreferredNeighbors"))?,
            unchoking_interval: unchoking_interval.ok_or(ConfigError::MissingKey("UnchokingInterval"))?,
            optimistic_unchoking_interval: optimistic_unchoking_interval
                .ok_or(ConfigError::MissingKey("OptimisticUnchokingInterval"))?,
            file_name: file_name.ok_or(ConfigError::MissingKey("FileName"))?,
            file_size: file_size.ok_or(ConfigError::MissingKey("FileSize"))?,
            piece_size: piece_size.ok_or(ConfigError::MissingKey("PieceSize"))?,
        })
    }
}

/// One row of the peer table: `id host port hasFile`.
#[derive(Debug, Clone)]
pub struct PeerTableEntry {
    pub id: u32,
    pub host: String,
    pub port: u16,
    pub has_file: bool,
}

impl PeerTableEntry {
    pub fn load_table(path: impl AsRef<Path>) -> Result<Vec<Self>, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        contents
            .lines()
            .filter_map(strip_comment)
            .filter(|line| !line.trim().is_empty())
            .map(Self::parse_line)
            .collect()
    }

    fn parse_line(line: &str) -> Result<Self, ConfigError> {
        let mut fields = line.split_whitespace();
        let malformed = || ConfigError::MalformedPeerLine(line.to_string());

        let id = fields.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
        let host = fields.next().ok_or_else(malformed)?.to_string();
        let port = fields.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
        let has_file_raw = fields.next().ok_or_else(malformed)?;
        let has_file = match has_file_raw {
            "1" => true,
            "0" => false,
            _ => return Err(malformed()),
        };

        Ok(Self {
            id,
            host,
            port,
            has_file,
        })
    }
}

/// Splits a `key value` line, stripping a trailing `#` or `//` comment first. Returns `None` for
/// blank/comment-only lines.
fn tokenize(raw_line: &str) -> Option<(&str, &str)> {
    let line = strip_comment(raw_line)?;
    let mut fields = line.split_whitespace();
    let key = fields.next()?;
    let value = fields.next()?;
    Some((key, value))
}

fn strip_comment(raw_line: &str) -> Option<&str> {
    let hash_cut = raw_line.find('#').map(|i| &raw_line[..i]).unwrap_or(raw_line);
    let line = hash_cut.find("//").map(|i| &hash_cut[..i]).unwrap_or(hash_cut);
    let trimmed = line.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_u32(key: &'static str, value: &str) -> Result<u32, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
