//! H.264 NAL unit classification for the keyframe reassembler.

const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
const NAL_TYPE_FU_A: u8 = 28;
const NAL_TYPE_FU_B: u8 = 29;

/// Whether an RTP payload carries a NAL unit that belongs in a keyframe.
///
/// SPS and PPS count: they often precede an IDR and are required to
/// re-initialize a downstream decoder, so they must be kept with it. For
/// fragmentation units the fragmented NAL type sits in the low 5 bits of the
/// second byte (RFC 6184, section 5.8); only IDR and SPS fragments matter.
pub fn is_keyframe_part(payload: &[u8]) -> bool {
    if payload.len() < 2 {
        return false;
    }
    match payload[0] & 0x1F {
        NAL_TYPE_SPS | NAL_TYPE_PPS | NAL_TYPE_IDR => true,
        NAL_TYPE_FU_A | NAL_TYPE_FU_B => {
            let fragment_type = payload[1] & 0x1F;
            fragment_type == NAL_TYPE_IDR || fragment_type == NAL_TYPE_SPS
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_payloads_are_not_keyframes() {
        assert!(!is_keyframe_part(&[]));
        assert!(!is_keyframe_part(&[0x65]));
    }

    #[test]
    fn parameter_sets_and_idr_are_keyframe_parts() {
        assert!(is_keyframe_part(&[0x67, 0x00])); // SPS
        assert!(is_keyframe_part(&[0x68, 0x00])); // PPS
        assert!(is_keyframe_part(&[0x65, 0x00])); // IDR
    }

    #[test]
    fn fragmentation_units_follow_the_inner_nal_type() {
        // FU-A carrying an IDR fragment.
        assert!(is_keyframe_part(&[0x7C, 0x85]));
        // FU-B carrying an SPS fragment.
        assert!(is_keyframe_part(&[0x7D, 0x07]));
        // FU-A carrying a non-IDR slice.
        assert!(!is_keyframe_part(&[0x7C, 0x01]));
    }

    #[test]
    fn other_nal_types_are_ignored() {
        assert!(!is_keyframe_part(&[0x61, 0x00])); // non-IDR slice
        assert!(!is_keyframe_part(&[0x66, 0x00])); // SEI
    }
}
