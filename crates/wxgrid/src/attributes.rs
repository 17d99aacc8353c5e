use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

use crate::Family;

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("unknown attribute: {0}")]
pub struct UnknownAttribute(pub String);

/// How an attribute behaves when hourly rows are bucketed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Accumulated over time, buckets hold the sum.
    Flux,
    /// Instantaneous state, buckets hold min/max/avg.
    State,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    AirTemperature,
    RelativeHumidity,
    SpecificHumidity,
    Pressure,
    ZonalWindSpeed,
    MeridionalWindSpeed,
    WindSpeed,
    WindDirection,
    ShortwaveRadiation,
    LongwaveRadiation,
    Precipitation,
    PotentialEvaporation,
}

impl Attribute {
    pub const ALL: [Attribute; 12] = [
        Attribute::AirTemperature,
        Attribute::RelativeHumidity,
        Attribute::SpecificHumidity,
        Attribute::Pressure,
        Attribute::ZonalWindSpeed,
        Attribute::MeridionalWindSpeed,
        Attribute::WindSpeed,
        Attribute::WindDirection,
        Attribute::ShortwaveRadiation,
        Attribute::LongwaveRadiation,
        Attribute::Precipitation,
        Attribute::PotentialEvaporation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Attribute::AirTemperature => "air_temperature",
            Attribute::RelativeHumidity => "relative_humidity",
            Attribute::SpecificHumidity => "specific_humidity",
            Attribute::Pressure => "pressure",
            Attribute::ZonalWindSpeed => "zonal_wind_speed",
            Attribute::MeridionalWindSpeed => "meridional_wind_speed",
            Attribute::WindSpeed => "wind_speed",
            Attribute::WindDirection => "wind_direction",
            Attribute::ShortwaveRadiation => "shortwave_radiation",
            Attribute::LongwaveRadiation => "longwave_radiation",
            Attribute::Precipitation => "precipitation",
            Attribute::PotentialEvaporation => "potential_evaporation",
        }
    }

    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Attribute::AirTemperature => &["tmp", "temperature"],
            Attribute::RelativeHumidity => &["rh", "humidity"],
            Attribute::SpecificHumidity => &["spfh"],
            Attribute::Pressure => &["pres"],
            Attribute::ZonalWindSpeed => &["ugrd"],
            Attribute::MeridionalWindSpeed => &["vgrd"],
            Attribute::WindSpeed => &["wind"],
            Attribute::WindDirection => &["wdir"],
            Attribute::ShortwaveRadiation => &["dswrf"],
            Attribute::LongwaveRadiation => &["dlwrf"],
            Attribute::Precipitation => &["apcp", "rain"],
            Attribute::PotentialEvaporation => &["pevap"],
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Attribute::AirTemperature => "degC",
            Attribute::RelativeHumidity => "%",
            Attribute::SpecificHumidity => "kg/kg",
            Attribute::Pressure => "Pa",
            Attribute::ZonalWindSpeed | Attribute::MeridionalWindSpeed | Attribute::WindSpeed => {
                "m/s"
            }
            Attribute::WindDirection => "degrees",
            Attribute::ShortwaveRadiation | Attribute::LongwaveRadiation => "W/m^2",
            Attribute::Precipitation | Attribute::PotentialEvaporation => "mm",
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Attribute::ShortwaveRadiation
            | Attribute::LongwaveRadiation
            | Attribute::Precipitation
            | Attribute::PotentialEvaporation => Kind::Flux,
            _ => Kind::State,
        }
    }

    /// SQL expression over a shard's short-code columns, or `None` when the
    /// family does not carry the attribute.
    pub fn source_expression(&self, family: Family) -> Option<&'static str> {
        match family {
            Family::Model => Some(match self {
                Attribute::AirTemperature => "tmp",
                Attribute::RelativeHumidity => "rh",
                Attribute::SpecificHumidity => "spfh",
                Attribute::Pressure => "pres",
                Attribute::ZonalWindSpeed => "ugrd",
                Attribute::MeridionalWindSpeed => "vgrd",
                Attribute::WindSpeed => "sqrt(ugrd * ugrd + vgrd * vgrd)",
                Attribute::WindDirection => "fmod(degrees(atan2(-ugrd, -vgrd)) + 360, 360)",
                Attribute::ShortwaveRadiation => "dswrf",
                Attribute::LongwaveRadiation => "dlwrf",
                Attribute::Precipitation => "apcp",
                Attribute::PotentialEvaporation => "pevap",
            }),
            Family::Radar => match self {
                Attribute::Precipitation => Some("qpe"),
                _ => None,
            },
        }
    }

    /// Column names this attribute produces in bucketed output.
    pub fn bucket_columns(&self) -> Vec<String> {
        match self.kind() {
            Kind::Flux => vec![self.name().to_string()],
            Kind::State => ["min", "max", "avg"]
                .iter()
                .map(|stat| format!("{}_{}", stat, self.name()))
                .collect(),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Attribute {
    type Err = UnknownAttribute;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Attribute::ALL
            .into_iter()
            .find(|attribute| {
                attribute.name() == wanted || attribute.aliases().contains(&wanted.as_str())
            })
            .ok_or_else(|| UnknownAttribute(s.trim().to_string()))
    }
}

/// Parse a comma separated attribute list, keeping request order and dropping repeats.
pub fn parse_attributes(list: &str) -> Result<Vec<Attribute>, UnknownAttribute> {
    let mut attributes = Vec::new();
    for raw in list.split(',').filter(|piece| !piece.trim().is_empty()) {
        let attribute: Attribute = raw.parse()?;
        if !attributes.contains(&attribute) {
            attributes.push(attribute);
        }
    }
    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_codes_and_aliases_resolve_to_canonical_names() {
        assert_eq!("tmp".parse::<Attribute>(), Ok(Attribute::AirTemperature));
        assert_eq!("APCP".parse::<Attribute>(), Ok(Attribute::Precipitation));
        assert_eq!(
            " relative_humidity ".parse::<Attribute>(),
            Ok(Attribute::RelativeHumidity)
        );
        assert_eq!(
            "snowfall".parse::<Attribute>(),
            Err(UnknownAttribute("snowfall".to_string()))
        );
    }

    #[test]
    fn attribute_lists_keep_order_and_drop_repeats() {
        let parsed = parse_attributes("rain, tmp,precipitation,,wind").unwrap();
        assert_eq!(
            parsed,
            vec![
                Attribute::Precipitation,
                Attribute::AirTemperature,
                Attribute::WindSpeed
            ]
        );
    }

    #[test]
    fn radar_family_only_carries_precipitation() {
        for attribute in Attribute::ALL {
            let radar = attribute.source_expression(Family::Radar);
            assert_eq!(radar.is_some(), attribute == Attribute::Precipitation);
            assert!(attribute.source_expression(Family::Model).is_some());
        }
    }

    #[test]
    fn bucket_columns_depend_on_kind() {
        assert_eq!(Attribute::Precipitation.bucket_columns(), vec!["precipitation"]);
        assert_eq!(
            Attribute::AirTemperature.bucket_columns(),
            vec![
                "min_air_temperature",
                "max_air_temperature",
                "avg_air_temperature"
            ]
        );
    }
}
