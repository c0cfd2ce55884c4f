//! Geographic <-> projected-plane conversion.
//!
//! A [`Projection`] is built from a PROJ-style definition string and the
//! extent of the planet on the projected plane. It is created once and shared
//! read-only (behind an `Arc`) by the addressing scheme, the viewport and the
//! map facade.

use crate::constants::{EARTH_RADIUS, MERCATOR_HALF_EXTENT};
use crate::core::geo::{LatLng, ProjectedPoint, ProjectedRect};
use crate::{MapError, Result};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};

const GOOGLE_DEFINITION: &str = "+proj=merc +a=6378137 +b=6378137 +lat_ts=0.0 +lon_0=0.0 \
     +x_0=0.0 +y_0=0 +k=1.0 +units=m +nadgrids=@null +no_defs";

const LAT_LONG_DEFINITION: &str = "+proj=latlong +ellps=WGS84 +datum=WGS84 +no_defs";

#[derive(Debug, Clone, Copy, PartialEq)]
enum ProjectionKind {
    /// Spherical mercator with the given sphere radius
    Mercator { radius: f64 },
    /// Plate carrée, projected units are degrees
    LatLong,
}

/// Parameters pulled out of a definition string
#[derive(Debug, Clone, Copy, PartialEq)]
struct Parameters {
    kind: ProjectionKind,
    central_meridian: f64,
    false_easting: f64,
    false_northing: f64,
}

/// Geographic <-> projected conversion plus the planet's projected extent.
#[derive(Debug)]
pub struct Projection {
    definition: String,
    params: Parameters,
    planet_bounds: ProjectedRect,
    wraps_horizontally: AtomicBool,
}

impl Projection {
    /// Build a projection from a PROJ-style definition such as
    /// `+proj=merc +a=6378137 +lon_0=0`.
    ///
    /// Supports `merc` and `latlong`/`longlat`. Fails with
    /// [`MapError::InvalidProjectionSpec`] on anything it cannot parse or on
    /// planet bounds without area.
    pub fn from_definition(definition: &str, planet_bounds: ProjectedRect) -> Result<Self> {
        let params = parse_definition(definition)?;

        if !(planet_bounds.size.width > 0.0 && planet_bounds.size.height > 0.0)
            || !planet_bounds.origin.easting.is_finite()
            || !planet_bounds.origin.northing.is_finite()
        {
            return Err(MapError::InvalidProjectionSpec(format!(
                "planet bounds must have a positive finite size, got {:?}",
                planet_bounds
            )));
        }

        Ok(Self {
            definition: definition.to_string(),
            params,
            planet_bounds,
            wraps_horizontally: AtomicBool::new(true),
        })
    }

    /// Spherical ("Google") mercator, EPSG:900913 / EPSG:3857
    pub fn google() -> Self {
        let bounds = ProjectedRect::from_coords(
            -MERCATOR_HALF_EXTENT,
            -MERCATOR_HALF_EXTENT,
            MERCATOR_HALF_EXTENT,
            MERCATOR_HALF_EXTENT,
        );
        Self {
            definition: GOOGLE_DEFINITION.to_string(),
            params: Parameters {
                kind: ProjectionKind::Mercator {
                    radius: EARTH_RADIUS,
                },
                central_meridian: 0.0,
                false_easting: 0.0,
                false_northing: 0.0,
            },
            planet_bounds: bounds,
            wraps_horizontally: AtomicBool::new(true),
        }
    }

    /// Unprojected latitude/longitude (EPSG:4326), units are degrees
    pub fn epsg_lat_long() -> Self {
        Self {
            definition: LAT_LONG_DEFINITION.to_string(),
            params: Parameters {
                kind: ProjectionKind::LatLong,
                central_meridian: 0.0,
                false_easting: 0.0,
                false_northing: 0.0,
            },
            planet_bounds: ProjectedRect::from_coords(-180.0, -90.0, 180.0, 90.0),
            wraps_horizontally: AtomicBool::new(true),
        }
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// The size of the earth, in projected units
    pub fn planet_bounds(&self) -> ProjectedRect {
        self.planet_bounds
    }

    pub fn wraps_horizontally(&self) -> bool {
        self.wraps_horizontally.load(Ordering::Relaxed)
    }

    pub fn set_wraps_horizontally(&self, wraps: bool) {
        self.wraps_horizontally.store(wraps, Ordering::Relaxed);
    }

    /// Geographic -> projected. Longitudes outside the half-turn either side
    /// of the central meridian are wrapped back onto the planet.
    pub fn to_projected(&self, lat_lng: LatLng) -> ProjectedPoint {
        let p = &self.params;
        let lng = LatLng::wrap_lng(lat_lng.lng - p.central_meridian);
        let (easting, northing) = match p.kind {
            ProjectionKind::Mercator { radius } => {
                let lat = LatLng::clamp_lat(lat_lng.lat).to_radians();
                (
                    lng.to_radians() * radius,
                    (PI / 4.0 + lat / 2.0).tan().ln() * radius,
                )
            }
            ProjectionKind::LatLong => (lng, lat_lng.lat),
        };
        ProjectedPoint::new(easting + p.false_easting, northing + p.false_northing)
    }

    /// Projected -> geographic
    pub fn to_geo(&self, point: ProjectedPoint) -> LatLng {
        let p = &self.params;
        let x = point.easting - p.false_easting;
        let y = point.northing - p.false_northing;
        let (lat, lng) = match p.kind {
            ProjectionKind::Mercator { radius } => (
                (2.0 * (y / radius).exp().atan() - PI / 2.0).to_degrees(),
                (x / radius).to_degrees(),
            ),
            ProjectionKind::LatLong => (y, x),
        };
        LatLng::new(lat, lng + p.central_meridian)
    }

    /// If the projection wraps, brings the easting back inside the planet
    /// bounds modulo the planet width. Otherwise returns `point` unchanged.
    pub fn wrap_horizontally(&self, point: ProjectedPoint) -> ProjectedPoint {
        if !self.wraps_horizontally() {
            return point;
        }
        let min = self.planet_bounds.min_easting();
        let width = self.planet_bounds.size.width;
        ProjectedPoint::new(min + (point.easting - min).rem_euclid(width), point.northing)
    }

    /// Applies [`Projection::wrap_horizontally`], then clamps the northing to
    /// the planet bounds. There is no vertical wrap.
    pub fn constrain_to_bounds(&self, point: ProjectedPoint) -> ProjectedPoint {
        let wrapped = self.wrap_horizontally(point);
        ProjectedPoint::new(
            wrapped.easting,
            wrapped.northing.clamp(
                self.planet_bounds.min_northing(),
                self.planet_bounds.max_northing(),
            ),
        )
    }
}

fn parse_definition(definition: &str) -> Result<Parameters> {
    let invalid = |reason: String| MapError::InvalidProjectionSpec(reason);

    let mut proj: Option<&str> = None;
    let mut radius = EARTH_RADIUS;
    let mut central_meridian = 0.0;
    let mut false_easting = 0.0;
    let mut false_northing = 0.0;

    for token in definition.split_whitespace() {
        let body = token
            .strip_prefix('+')
            .ok_or_else(|| invalid(format!("expected '+key[=value]', got '{}'", token)))?;
        let (key, value) = match body.split_once('=') {
            Some((key, value)) => (key, Some(value)),
            None => (body, None),
        };
        if key.is_empty() {
            return Err(invalid(format!("empty parameter name in '{}'", token)));
        }

        let number = |value: Option<&str>| -> Result<f64> {
            let raw = value.ok_or_else(|| invalid(format!("'{}' needs a value", key)))?;
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| invalid(format!("'{}' is not a number: '{}'", key, raw)))
        };

        match key {
            "proj" => {
                proj = Some(value.ok_or_else(|| invalid("'proj' needs a value".to_string()))?)
            }
            "a" | "R" => radius = number(value)?,
            "lon_0" => central_meridian = number(value)?,
            "x_0" => false_easting = number(value)?,
            "y_0" => false_northing = number(value)?,
            // Accepted for compatibility, no effect on the spherical formulas
            _ => {}
        }
    }

    let kind = match proj {
        Some("merc") => {
            if radius <= 0.0 {
                return Err(invalid(format!("sphere radius must be positive, got {}", radius)));
            }
            ProjectionKind::Mercator { radius }
        }
        Some("latlong") | Some("longlat") | Some("lonlat") | Some("latlon") => {
            ProjectionKind::LatLong
        }
        Some(other) => return Err(invalid(format!("unsupported projection '{}'", other))),
        None => return Err(invalid("missing '+proj' parameter".to_string())),
    };

    Ok(Parameters {
        kind,
        central_meridian,
        false_easting,
        false_northing,
    })
}
