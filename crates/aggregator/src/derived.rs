//! Values computed from the selected readings rather than reported by a source.

use crate::{AggregatedObservation, FieldName, FlightCategory, WeatherReading};

/// Standard sea-level pressure, inHg.
pub const STANDARD_ALTIMETER_INHG: f64 = 29.92;
/// ISA sea-level temperature, degrees C.
pub const ISA_SEA_LEVEL_C: f64 = 15.0;
/// ISA lapse rate, degrees C per 1000 ft.
pub const ISA_LAPSE_C_PER_1000FT: f64 = 2.0;
/// Density altitude rises 120 ft per degree C above ISA.
pub const DENSITY_ALTITUDE_FT_PER_C: f64 = 120.0;

/// Magnus-Tetens coefficients (b, c in degrees C).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MagnusConstants {
    /// b=17.368, c=238.88; good from about -40 to +60 C.
    Standard,
    /// Buck's b=17.27, c=237.7; tighter over 0..50 C.
    Buck,
}

impl MagnusConstants {
    fn coefficients(self) -> (f64, f64) {
        match self {
            MagnusConstants::Standard => (17.368, 238.88),
            MagnusConstants::Buck => (17.27, 237.7),
        }
    }

    fn gamma(self, temp_c: f64) -> f64 {
        let (b, c) = self.coefficients();
        b * temp_c / (c + temp_c)
    }
}

/// Relative humidity (percent) from temperature and dewpoint.
pub fn relative_humidity(temp_c: f64, dewpoint_c: f64, constants: MagnusConstants) -> f64 {
    let rh = 100.0 * (constants.gamma(dewpoint_c) - constants.gamma(temp_c)).exp();
    rh.clamp(0.0, 100.0)
}

/// Dewpoint from temperature and relative humidity. `None` for non-positive humidity.
pub fn dewpoint(temp_c: f64, humidity_pct: f64, constants: MagnusConstants) -> Option<f64> {
    if humidity_pct <= 0.0 {
        return None;
    }
    let (b, c) = constants.coefficients();
    let gamma = (humidity_pct.min(100.0) / 100.0).ln() + constants.gamma(temp_c);
    Some(c * gamma / (b - gamma))
}

pub fn pressure_altitude(elevation_ft: f64, altimeter_inhg: f64) -> f64 {
    elevation_ft + (STANDARD_ALTIMETER_INHG - altimeter_inhg) * 1000.0
}

/// ISA temperature at the given pressure altitude, in Celsius.
pub fn isa_temperature_c(pressure_altitude_ft: f64) -> f64 {
    ISA_SEA_LEVEL_C - ISA_LAPSE_C_PER_1000FT * (pressure_altitude_ft / 1000.0)
}

/// The deviation must be taken in Celsius; a Fahrenheit delta overstates it by 1.8x.
pub fn density_altitude(pressure_altitude_ft: f64, temp_c: f64) -> f64 {
    pressure_altitude_ft + DENSITY_ALTITUDE_FT_PER_C * (temp_c - isa_temperature_c(pressure_altitude_ft))
}

pub fn gust_factor(gust_kt: f64, speed_kt: f64) -> f64 {
    (gust_kt - speed_kt).max(0.0)
}

/// What is known about the ceiling for category purposes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ceiling {
    Unknown,
    /// A report with no broken/overcast layer.
    Unlimited,
    Feet(f64),
}

impl Ceiling {
    /// A valid reading with no value is a reported absence of a ceiling.
    pub fn from_reading(reading: Option<&WeatherReading>) -> Ceiling {
        match reading {
            Some(r) if r.valid => match r.as_number() {
                Some(feet) => Ceiling::Feet(feet),
                None if r.value.is_none() => Ceiling::Unlimited,
                None => Ceiling::Unknown,
            },
            _ => Ceiling::Unknown,
        }
    }
}

fn visibility_category(visibility_sm: f64) -> FlightCategory {
    if visibility_sm < 1.0 {
        FlightCategory::Lifr
    } else if visibility_sm < 3.0 {
        FlightCategory::Ifr
    } else if visibility_sm <= 5.0 {
        FlightCategory::Mvfr
    } else {
        FlightCategory::Vfr
    }
}

fn ceiling_category(ceiling_ft: f64) -> FlightCategory {
    if ceiling_ft < 500.0 {
        FlightCategory::Lifr
    } else if ceiling_ft < 1000.0 {
        FlightCategory::Ifr
    } else if ceiling_ft <= 3000.0 {
        FlightCategory::Mvfr
    } else {
        FlightCategory::Vfr
    }
}

/// VFR needs both conditions to qualify; anything else is the worse of the two.
/// With one condition unknown, only a non-VFR result can be stated.
pub fn flight_category(ceiling: Ceiling, visibility_sm: Option<f64>) -> Option<FlightCategory> {
    let by_ceiling = match ceiling {
        Ceiling::Unknown => None,
        Ceiling::Unlimited => Some(FlightCategory::Vfr),
        Ceiling::Feet(ft) => Some(ceiling_category(ft)),
    };
    let by_visibility = visibility_sm.map(visibility_category);

    match (by_ceiling, by_visibility) {
        (Some(c), Some(v)) => Some(c.max(v)),
        (Some(single), None) | (None, Some(single)) => {
            (single != FlightCategory::Vfr).then_some(single)
        }
        (None, None) => None,
    }
}

/// Recomputes every derived value on the observation from its current fields.
///
/// Humidity or dewpoint is filled in only when the other two of the trio are
/// usable; the filled value takes the provenance of its older input.
pub fn recompute_derived(obs: &mut AggregatedObservation, elevation_ft: f64) {
    let constants = MagnusConstants::Standard;

    if let (Some(t), Some(td), false) = (
        obs.value(FieldName::Temperature),
        obs.value(FieldName::Dewpoint),
        obs.is_usable(FieldName::Humidity),
    ) {
        let rh = relative_humidity(t, td, constants);
        if let Some(reading) = derived_reading(obs, FieldName::Humidity, rh) {
            obs.record(FieldName::Humidity, reading);
        }
    }
    if let (Some(t), Some(rh), false) = (
        obs.value(FieldName::Temperature),
        obs.value(FieldName::Humidity),
        obs.is_usable(FieldName::Dewpoint),
    ) {
        if let Some(reading) = dewpoint(t, rh, constants)
            .and_then(|td| derived_reading(obs, FieldName::Dewpoint, td))
        {
            obs.record(FieldName::Dewpoint, reading);
        }
    }

    let pressure_alt = obs
        .value(FieldName::Pressure)
        .map(|altimeter| pressure_altitude(elevation_ft, altimeter).round());
    obs.altitudes.pressure_altitude_ft = pressure_alt;
    obs.altitudes.density_altitude_ft = match (pressure_alt, obs.value(FieldName::Temperature)) {
        (Some(pa), Some(t)) => Some(density_altitude(pa, t).round()),
        _ => None,
    };

    obs.gust_factor_kt = match (obs.value(FieldName::GustSpeed), obs.value(FieldName::WindSpeed)) {
        (Some(gust), Some(speed)) => Some(gust_factor(gust, speed)),
        _ => None,
    };

    obs.flight_category = flight_category(
        Ceiling::from_reading(obs.reading(FieldName::Ceiling)),
        obs.value(FieldName::Visibility),
    );
}

/// Builds a derived reading whose provenance is the older of its two inputs.
fn derived_reading(obs: &AggregatedObservation, target: FieldName, value: f64) -> Option<WeatherReading> {
    let inputs: &[FieldName] = match target {
        FieldName::Humidity => &[FieldName::Temperature, FieldName::Dewpoint],
        FieldName::Dewpoint => &[FieldName::Temperature, FieldName::Humidity],
        _ => return None,
    };
    let oldest = inputs
        .iter()
        .filter_map(|f| obs.reading(*f))
        .min_by(|a, b| {
            a.observed_at
                .cmp(&b.observed_at)
                .then_with(|| a.source.cmp(&b.source))
        })?;
    Some(WeatherReading::new(
        target,
        value,
        oldest.source.clone(),
        oldest.observed_at,
    ))
}
