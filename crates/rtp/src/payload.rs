use num_complex::Complex32;

use crate::Error;

/// The IQ sample encoding carried by a packet's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Interleaved 16-bit signed integers, big-endian network order, scaled
    /// to full-scale 1.0.
    Int16,
    /// Interleaved IEEE-754 float32, big-endian network order.
    Float32,
}

const INT16_PAYLOAD_TYPES: [u8; 2] = [97, 120];
const FLOAT32_PAYLOAD_TYPES: [u8; 1] = [11];

/// Resolves an RTP payload type to an IQ [`Encoding`].
///
/// Static types 97/120 are always int16; 11 is always float32. Dynamic
/// types in `[96, 127]` outside those are disambiguated by inspecting the
/// payload itself (see [`sniff_encoding`]).
pub fn resolve_encoding(payload_type: u8, payload: &[u8]) -> Result<Encoding, Error> {
    if INT16_PAYLOAD_TYPES.contains(&payload_type) {
        return Ok(Encoding::Int16);
    }
    if FLOAT32_PAYLOAD_TYPES.contains(&payload_type) {
        return Ok(Encoding::Float32);
    }
    if (96..=127).contains(&payload_type) {
        return sniff_encoding(payload).ok_or(Error::UnknownPayloadType(payload_type));
    }
    Err(Error::UnknownPayloadType(payload_type))
}

/// Heuristically classifies a dynamic payload type's encoding by magnitude
/// distribution: float32 samples for a normalized IQ stream cluster in
/// `[-1, 1]`, so interpreting well-formed float32 bytes as int16 instead
/// produces wildly implausible amplitudes far more often than the reverse.
fn sniff_encoding(payload: &[u8]) -> Option<Encoding> {
    if payload.len() % 8 == 0 && !payload.is_empty() {
        if let Some(samples) = decode_float32(payload).ok() {
            let plausible = samples
                .iter()
                .all(|c| c.re.abs() <= 4.0 && c.im.abs() <= 4.0);
            if plausible {
                return Some(Encoding::Float32);
            }
        }
    }
    if payload.len() % 4 == 0 && !payload.is_empty() {
        return Some(Encoding::Int16);
    }
    None
}

/// Decodes a payload of a known [`Encoding`] into normalized complex IQ
/// samples (I in the real part, Q in the imaginary part, full scale 1.0).
pub fn decode(encoding: Encoding, payload: &[u8]) -> Result<Vec<Complex32>, Error> {
    match encoding {
        Encoding::Int16 => decode_int16(payload),
        Encoding::Float32 => decode_float32(payload),
    }
}

fn decode_int16(payload: &[u8]) -> Result<Vec<Complex32>, Error> {
    if payload.len() % 4 != 0 {
        return Err(Error::MisalignedPayload);
    }
    const SCALE: f32 = 1.0 / 32768.0;
    Ok(payload
        .chunks_exact(4)
        .map(|c| {
            let i = i16::from_be_bytes([c[0], c[1]]) as f32 * SCALE;
            let q = i16::from_be_bytes([c[2], c[3]]) as f32 * SCALE;
            Complex32::new(i, q)
        })
        .collect())
}

fn decode_float32(payload: &[u8]) -> Result<Vec<Complex32>, Error> {
    if payload.len() % 8 != 0 {
        return Err(Error::MisalignedPayload);
    }
    Ok(payload
        .chunks_exact(8)
        .map(|c| {
            let i = f32::from_be_bytes([c[0], c[1], c[2], c[3]]);
            let q = f32::from_be_bytes([c[4], c[5], c[6], c[7]]);
            Complex32::new(i, q)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_static_types() {
        assert_eq!(resolve_encoding(97, &[]).unwrap(), Encoding::Int16);
        assert_eq!(resolve_encoding(120, &[]).unwrap(), Encoding::Int16);
        assert_eq!(resolve_encoding(11, &[]).unwrap(), Encoding::Float32);
    }

    #[test]
    fn rejects_type_outside_dynamic_range() {
        assert!(matches!(
            resolve_encoding(200, &[0; 8]),
            Err(Error::UnknownPayloadType(200))
        ));
    }

    #[test]
    fn roundtrips_int16() {
        let samples = [Complex32::new(0.5, -0.25), Complex32::new(-1.0, 1.0)];
        let mut payload = Vec::new();
        for s in &samples {
            payload.extend_from_slice(&((s.re * 32768.0) as i16).to_be_bytes());
            payload.extend_from_slice(&((s.im * 32768.0) as i16).to_be_bytes());
        }
        let decoded = decode(Encoding::Int16, &payload).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!((decoded[0].re - 0.5).abs() < 1e-3);
    }

    #[test]
    fn roundtrips_float32() {
        let samples = [Complex32::new(0.1, 0.2), Complex32::new(-0.3, 0.4)];
        let mut payload = Vec::new();
        for s in &samples {
            payload.extend_from_slice(&s.re.to_be_bytes());
            payload.extend_from_slice(&s.im.to_be_bytes());
        }
        let decoded = decode(Encoding::Float32, &payload).unwrap();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn rejects_misaligned_payload() {
        assert!(matches!(
            decode(Encoding::Int16, &[0, 0, 0]),
            Err(Error::MisalignedPayload)
        ));
    }

    #[test]
    fn sniffs_dynamic_float32() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0.123f32.to_be_bytes());
        payload.extend_from_slice(&(-0.456f32).to_be_bytes());
        assert_eq!(resolve_encoding(100, &payload).unwrap(), Encoding::Float32);
    }
}
