use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint};

use crate::derive::EvaluationSecret;
use crate::error::CoreError;

pub const COORDINATE_BYTES: usize = 32;
const COORDINATE_HEX_CHARS: usize = COORDINATE_BYTES * 2;

/// An affine coordinate pair over the secp256k1 field, as received off the
/// wire. Immutable once constructed. Decoding validates the hex encoding
/// only; whether the pair satisfies the curve equation is a separate
/// question answered by [`CurvePoint::is_member`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurvePoint {
    x: [u8; COORDINATE_BYTES],
    y: [u8; COORDINATE_BYTES],
}

impl CurvePoint {
    /// Parses two big-endian hexadecimal coordinate strings. Inputs shorter
    /// than 64 chars are left-padded like big-integer parses; empty,
    /// over-long, or non-hex input fails with `MalformedEncoding`.
    pub fn decode(x_hex: &str, y_hex: &str) -> Result<Self, CoreError> {
        Ok(Self {
            x: decode_coordinate(x_hex)?,
            y: decode_coordinate(y_hex)?,
        })
    }

    /// True iff the coordinates satisfy the curve equation. Out-of-field
    /// coordinates are not members; the point at infinity has no affine
    /// encoding and can never be constructed here.
    #[must_use]
    pub fn is_member(&self) -> bool {
        self.to_affine().is_some()
    }

    /// Serializes as `"x,y"` with fixed-width 32-byte lowercase hex
    /// coordinates.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{},{}", hex::encode(self.x), hex::encode(self.y))
    }

    /// Multiplies the point by an evaluation secret. Fails on non-member
    /// input and on an infinite result (a zero scalar).
    pub fn multiply(&self, secret: &EvaluationSecret) -> Result<Self, CoreError> {
        let affine = self.to_affine().ok_or(CoreError::CurveMembership)?;
        let product = (ProjectivePoint::from(affine) * secret.scalar()).to_affine();
        Self::from_affine(&product)
    }

    fn to_affine(&self) -> Option<AffinePoint> {
        let x = FieldBytes::from(self.x);
        let y = FieldBytes::from(self.y);
        let encoded = EncodedPoint::from_affine_coordinates(&x, &y, false);
        Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
    }

    fn from_affine(point: &AffinePoint) -> Result<Self, CoreError> {
        let encoded = point.to_encoded_point(false);
        let (Some(x), Some(y)) = (encoded.x(), encoded.y()) else {
            return Err(CoreError::InfiniteResult);
        };
        let mut out = Self {
            x: [0u8; COORDINATE_BYTES],
            y: [0u8; COORDINATE_BYTES],
        };
        out.x.copy_from_slice(x);
        out.y.copy_from_slice(y);
        Ok(out)
    }
}

fn decode_coordinate(input: &str) -> Result<[u8; COORDINATE_BYTES], CoreError> {
    if input.is_empty() || input.len() > COORDINATE_HEX_CHARS {
        return Err(CoreError::MalformedEncoding(format!(
            "coordinate must be 1..={COORDINATE_HEX_CHARS} hex chars, got {}",
            input.len()
        )));
    }
    let padded = if input.len() % 2 == 0 {
        input.to_string()
    } else {
        format!("0{input}")
    };
    let bytes =
        hex::decode(&padded).map_err(|err| CoreError::MalformedEncoding(err.to_string()))?;
    let mut out = [0u8; COORDINATE_BYTES];
    out[COORDINATE_BYTES - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}
