//! Instance class names (`<family>.<size>`)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// x86_64 instance families
const X86_FAMILIES: &[&str] = &[
    "c4", "c5", "c5a", "c5ad", "c5d", "c5n", "c6a", "c6i", "c6id", "c6in", "c7a", "c7i",
    "d2", "d3", "d3en", "g3", "g3s", "g4ad", "g4dn", "g5", "g6", "g6e", "hpc6a", "hpc6id",
    "hpc7a", "i3", "i3en", "i4i", "inf1", "inf2", "m4", "m5", "m5a", "m5ad", "m5d", "m5dn",
    "m5n", "m5zn", "m6a", "m6i", "m6id", "m6idn", "m6in", "m7a", "m7i", "m7i-flex", "p3",
    "p3dn", "p4d", "p4de", "p5", "r4", "r5", "r5a", "r5ad", "r5b", "r5d", "r5dn", "r5n",
    "r6a", "r6i", "r6id", "r6idn", "r6in", "r7a", "r7i", "r7iz", "t2", "t3", "t3a", "trn1",
    "trn1n", "x1", "x1e", "x2idn", "x2iedn", "x2iezn", "z1d",
];

/// arm64 (Graviton) instance families
const ARM_FAMILIES: &[&str] = &[
    "a1", "c6g", "c6gd", "c6gn", "c7g", "c7gd", "c7gn", "g5g", "hpc7g", "i4g", "im4gn",
    "is4gen", "m6g", "m6gd", "m7g", "m7gd", "r6g", "r6gd", "r7g", "r7gd", "t4g", "x2gd",
];

/// CPU architecture of an instance family
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Architecture {
    /// x86_64
    X86_64,
    /// arm64
    Arm64,
}

/// Size part of an instance class
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstanceSize {
    /// nano
    Nano,
    /// micro
    Micro,
    /// small
    Small,
    /// medium
    Medium,
    /// large
    Large,
    /// xlarge
    XLarge,
    /// `<N>xlarge` with N >= 2
    MultipleXLarge(u32),
    /// metal
    Metal,
    /// `metal-<N>xl`
    MetalXl(u32),
}

impl fmt::Display for InstanceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceSize::Nano => write!(f, "nano"),
            InstanceSize::Micro => write!(f, "micro"),
            InstanceSize::Small => write!(f, "small"),
            InstanceSize::Medium => write!(f, "medium"),
            InstanceSize::Large => write!(f, "large"),
            InstanceSize::XLarge => write!(f, "xlarge"),
            InstanceSize::MultipleXLarge(n) => write!(f, "{n}xlarge"),
            InstanceSize::Metal => write!(f, "metal"),
            InstanceSize::MetalXl(n) => write!(f, "metal-{n}xl"),
        }
    }
}

fn parse_multiplier(digits: &str) -> Option<u32> {
    if digits.is_empty() || digits.starts_with('0') || !digits.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    digits.parse().ok()
}

impl FromStr for InstanceSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let size = match s {
            "nano" => InstanceSize::Nano,
            "micro" => InstanceSize::Micro,
            "small" => InstanceSize::Small,
            "medium" => InstanceSize::Medium,
            "large" => InstanceSize::Large,
            "xlarge" => InstanceSize::XLarge,
            "metal" => InstanceSize::Metal,
            _ => {
                if let Some(n) = s
                    .strip_prefix("metal-")
                    .and_then(|rest| rest.strip_suffix("xl"))
                    .and_then(parse_multiplier)
                {
                    InstanceSize::MetalXl(n)
                } else if let Some(n) = s.strip_suffix("xlarge").and_then(parse_multiplier) {
                    if n < 2 {
                        return Err(format!("unknown size '{s}'"));
                    }
                    InstanceSize::MultipleXLarge(n)
                } else {
                    return Err(format!("unknown size '{s}'"));
                }
            }
        };
        Ok(size)
    }
}

/// A validated instance class such as `c5.2xlarge`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceClass {
    family: String,
    size: InstanceSize,
}

impl InstanceClass {
    /// Parse `<family>.<size>`
    pub fn parse(s: &str) -> Result<Self, String> {
        let (family, size) = s
            .split_once('.')
            .ok_or_else(|| "expected <family>.<size>".to_string())?;
        if family.is_empty() {
            return Err("family cannot be empty".to_string());
        }
        if family_architecture(family).is_none() {
            return Err(format!("unknown instance family '{family}'"));
        }
        let size = size.parse()?;
        Ok(Self {
            family: family.to_string(),
            size,
        })
    }

    /// Family, e.g. "c5"
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Size
    pub fn size(&self) -> InstanceSize {
        self.size
    }

    /// CPU architecture of the family
    pub fn architecture(&self) -> Architecture {
        family_architecture(&self.family).unwrap_or(Architecture::X86_64)
    }
}

fn family_architecture(family: &str) -> Option<Architecture> {
    if X86_FAMILIES.contains(&family) {
        Some(Architecture::X86_64)
    } else if ARM_FAMILIES.contains(&family) {
        Some(Architecture::Arm64)
    } else {
        None
    }
}

impl fmt::Display for InstanceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.family, self.size)
    }
}

impl FromStr for InstanceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for InstanceClass {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InstanceClass> for String {
    fn from(value: InstanceClass) -> Self {
        value.to_string()
    }
}
