//! Orientation resolution for video tracks
//!
//! Derives the rotation class of a track's stored affine transform and
//! corrects transforms authored without translation, so that a rotated
//! frame renders inside the composition instead of being clipped.

use crate::time::MediaTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 2D size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const ZERO: Size = Size { width: 0.0, height: 0.0 };

    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_zero(&self) -> bool {
        self.width == 0.0 && self.height == 0.0
    }

    /// Applies the linear part of `t` (translation does not affect sizes)
    pub fn applying(&self, t: &AffineTransform) -> Size {
        Size {
            width: t.a * self.width + t.c * self.height,
            height: t.b * self.width + t.d * self.height,
        }
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Affine transform `[a b; c d; tx ty]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Pure rotation by `degrees`, no translation
    pub fn rotation(degrees: f64) -> Self {
        // Quarter turns are exact, as authored by encoders
        let (sin, cos) = match degrees.rem_euclid(360.0) {
            d if d == 0.0 => (0.0, 1.0),
            d if d == 90.0 => (1.0, 0.0),
            d if d == 180.0 => (0.0, -1.0),
            d if d == 270.0 => (-1.0, 0.0),
            _ => degrees.to_radians().sin_cos(),
        };
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn with_translation(mut self, tx: f64, ty: f64) -> Self {
        self.tx = tx;
        self.ty = ty;
        self
    }

    /// Rotation in whole degrees, normalized to `[0, 360)`
    pub fn rotation_degrees(&self) -> i32 {
        let mut degrees = self.b.atan2(self.a).to_degrees();
        if degrees < 0.0 {
            degrees += 360.0;
        }
        (degrees.round() as i32).rem_euclid(360)
    }

    pub fn rotation_class(&self) -> Rotation {
        Rotation::from_degrees(self.rotation_degrees())
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        AffineTransform::IDENTITY
    }
}

/// Quarter-turn classification of a transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
    /// Not a quarter turn
    Other(i32),
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees {
            0 => Rotation::Deg0,
            90 => Rotation::Deg90,
            180 => Rotation::Deg180,
            270 => Rotation::Deg270,
            other => Rotation::Other(other),
        }
    }

    /// True when the rotated frame swaps width and height
    pub fn is_portrait(&self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Orientation metadata of a video track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackGeometry {
    pub natural_size: Size,
    pub preferred_transform: AffineTransform,
}

/// Output of [`resolve`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedTransform {
    pub transform: AffineTransform,
    pub rotation: Rotation,
}

/// Corrects the stored transform of a track.
///
/// Transforms with zero translation get a compensation for 90° and 270°
/// derived from the natural size. 0° and 180° are returned unchanged.
pub fn resolve(track: &TrackGeometry) -> ResolvedTransform {
    let mut transform = track.preferred_transform;
    let rotation = transform.rotation_class();

    if transform.tx == 0.0 && transform.ty == 0.0 {
        debug!(
            rotation = ?rotation,
            natural = %track.natural_size,
            "Transform has no translation"
        );
        match rotation {
            Rotation::Deg90 => {
                transform.tx = track.natural_size.height;
                transform.ty = 0.0;
            }
            Rotation::Deg270 => {
                transform.tx = 0.0;
                transform.ty = track.natural_size.width;
            }
            _ => {}
        }
    }

    ResolvedTransform { transform, rotation }
}

/// Render-time description attached to a decoder item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoComposition {
    pub transform: AffineTransform,
    pub render_size: Size,
    pub frame_duration: MediaTime,
    /// Instruction range start (always zero)
    pub start: MediaTime,
    /// Instruction range length (the asset's duration)
    pub duration: MediaTime,
}

/// Builds the composition for a resolved transform.
///
/// The render size swaps the natural dimensions for portrait rotations;
/// a single instruction covers the whole asset at `frame_rate` fps.
pub fn build_composition(
    resolved: &ResolvedTransform,
    natural_size: Size,
    asset_duration: MediaTime,
    frame_rate: i32,
) -> VideoComposition {
    let render_size = if resolved.rotation.is_portrait() {
        Size::new(natural_size.height, natural_size.width)
    } else {
        natural_size
    };

    VideoComposition {
        transform: resolved.transform,
        render_size,
        frame_duration: MediaTime::new(1, frame_rate.max(1)),
        start: MediaTime::ZERO,
        duration: asset_duration,
    }
}

/// Display size reported to the host: the natural size with the track's
/// transform applied, falling back per dimension to the presentation size
/// when the transformed dimension collapses to zero.
pub fn display_size(track: &TrackGeometry, presentation: Size) -> Size {
    let real = track.natural_size.applying(&track.preferred_transform);
    let width = real.width.abs();
    let height = real.height.abs();
    Size {
        width: if width != 0.0 { width } else { presentation.width },
        height: if height != 0.0 { height } else { presentation.height },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(degrees: f64, width: f64, height: f64) -> TrackGeometry {
        TrackGeometry {
            natural_size: Size::new(width, height),
            preferred_transform: AffineTransform::rotation(degrees),
        }
    }

    #[test]
    fn test_rotation_degrees_normalized() {
        assert_eq!(AffineTransform::IDENTITY.rotation_degrees(), 0);
        assert_eq!(AffineTransform::rotation(90.0).rotation_degrees(), 90);
        assert_eq!(AffineTransform::rotation(180.0).rotation_degrees(), 180);
        assert_eq!(AffineTransform::rotation(-90.0).rotation_degrees(), 270);
        assert_eq!(AffineTransform::rotation(270.0).rotation_degrees(), 270);
    }

    #[test]
    fn test_fix_90_zero_translation() {
        let resolved = resolve(&geometry(90.0, 1080.0, 1920.0));
        assert_eq!(resolved.rotation, Rotation::Deg90);
        assert_eq!(resolved.transform.tx, 1920.0);
        assert_eq!(resolved.transform.ty, 0.0);
    }

    #[test]
    fn test_fix_270_zero_translation() {
        let resolved = resolve(&geometry(270.0, 1080.0, 1920.0));
        assert_eq!(resolved.rotation, Rotation::Deg270);
        assert_eq!(resolved.transform.tx, 0.0);
        assert_eq!(resolved.transform.ty, 1080.0);
    }

    #[test]
    fn test_0_and_180_untouched() {
        for degrees in [0.0, 180.0] {
            let resolved = resolve(&geometry(degrees, 640.0, 480.0));
            assert_eq!(resolved.transform.tx, 0.0);
            assert_eq!(resolved.transform.ty, 0.0);
        }
    }

    #[test]
    fn test_existing_translation_kept() {
        let mut track = geometry(90.0, 1080.0, 1920.0);
        track.preferred_transform = track.preferred_transform.with_translation(10.0, 20.0);
        let resolved = resolve(&track);
        assert_eq!(resolved.transform.tx, 10.0);
        assert_eq!(resolved.transform.ty, 20.0);
    }

    #[test]
    fn test_composition_swaps_for_portrait() {
        let track = geometry(90.0, 1080.0, 1920.0);
        let composition = build_composition(
            &resolve(&track),
            track.natural_size,
            MediaTime::from_millis(10_000),
            30,
        );
        assert_eq!(composition.render_size, Size::new(1920.0, 1080.0));
        assert_eq!(composition.frame_duration, MediaTime::new(1, 30));
        assert_eq!(composition.duration, MediaTime::from_millis(10_000));
    }

    #[test]
    fn test_composition_keeps_landscape() {
        let track = geometry(180.0, 1920.0, 1080.0);
        let composition =
            build_composition(&resolve(&track), track.natural_size, MediaTime::ZERO, 30);
        assert_eq!(composition.render_size, Size::new(1920.0, 1080.0));
    }

    #[test]
    fn test_display_size_fallback() {
        let track = TrackGeometry {
            natural_size: Size::ZERO,
            preferred_transform: AffineTransform::IDENTITY,
        };
        assert_eq!(display_size(&track, Size::new(640.0, 360.0)), Size::new(640.0, 360.0));

        let rotated = geometry(90.0, 1080.0, 1920.0);
        let size = display_size(&rotated, Size::new(1.0, 1.0));
        assert!((size.width - 1920.0).abs() < 1e-6);
        assert!((size.height - 1080.0).abs() < 1e-6);
    }
}
