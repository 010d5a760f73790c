// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! VESA DMT timings used for the EDID-less fallback list and for resolving established and
//! standard EDID timings.

use crate::mode::Mode;
use crate::mode::ModeFlags;

const PP: ModeFlags = ModeFlags::PHSYNC.union(ModeFlags::PVSYNC);
const NN: ModeFlags = ModeFlags::NHSYNC.union(ModeFlags::NVSYNC);
const NP: ModeFlags = ModeFlags::NHSYNC.union(ModeFlags::PVSYNC);
const PPI: ModeFlags = PP.union(ModeFlags::INTERLACE);

/// Highest refresh rate offered when the sink could not be identified.
pub const NOEDID_MAX_REFRESH: u32 = 61;

#[rustfmt::skip]
pub const DMT_MODES: &[Mode] = &[
    // 640x480@60Hz
    Mode::new(25175, 640, 656, 752, 800, 480, 490, 492, 525, NN),
    // 640x480@72Hz
    Mode::new(31500, 640, 664, 704, 832, 480, 489, 492, 520, NN),
    // 640x480@75Hz
    Mode::new(31500, 640, 656, 720, 840, 480, 481, 484, 500, NN),
    // 800x600@56Hz
    Mode::new(36000, 800, 824, 896, 1024, 600, 601, 603, 625, PP),
    // 800x600@60Hz
    Mode::new(40000, 800, 840, 968, 1056, 600, 601, 605, 628, PP),
    // 800x600@72Hz
    Mode::new(50000, 800, 856, 976, 1040, 600, 637, 643, 666, PP),
    // 800x600@75Hz
    Mode::new(49500, 800, 816, 896, 1056, 600, 601, 604, 625, PP),
    // 1024x768@43Hz, interlaced
    Mode::new(44900, 1024, 1032, 1208, 1264, 768, 768, 776, 817, PPI),
    // 1024x768@60Hz
    Mode::new(65000, 1024, 1048, 1184, 1344, 768, 771, 777, 806, NN),
    // 1024x768@70Hz
    Mode::new(75000, 1024, 1048, 1184, 1328, 768, 771, 777, 806, NN),
    // 1024x768@75Hz
    Mode::new(78750, 1024, 1040, 1136, 1312, 768, 769, 772, 800, PP),
    // 1152x864@75Hz
    Mode::new(108000, 1152, 1216, 1344, 1600, 864, 865, 868, 900, PP),
    // 1280x720@60Hz
    Mode::new(74250, 1280, 1390, 1430, 1650, 720, 725, 730, 750, PP),
    // 1280x800@60Hz
    Mode::new(83500, 1280, 1352, 1480, 1680, 800, 803, 809, 831, NP),
    // 1280x960@60Hz
    Mode::new(108000, 1280, 1376, 1488, 1800, 960, 961, 964, 1000, PP),
    // 1280x1024@60Hz
    Mode::new(108000, 1280, 1328, 1440, 1688, 1024, 1025, 1028, 1066, PP),
    // 1280x1024@75Hz
    Mode::new(135000, 1280, 1296, 1440, 1688, 1024, 1025, 1028, 1066, PP),
    // 1360x768@60Hz
    Mode::new(85500, 1360, 1424, 1536, 1792, 768, 771, 777, 795, PP),
    // 1440x900@60Hz
    Mode::new(106500, 1440, 1520, 1672, 1904, 900, 903, 909, 934, NP),
    // 1600x900@60Hz, reduced blanking
    Mode::new(108000, 1600, 1624, 1704, 1800, 900, 901, 904, 1000, PP),
    // 1600x1200@60Hz
    Mode::new(162000, 1600, 1664, 1856, 2160, 1200, 1201, 1204, 1250, PP),
    // 1680x1050@60Hz
    Mode::new(146250, 1680, 1784, 1960, 2240, 1050, 1053, 1059, 1089, NP),
    // 1920x1080@60Hz
    Mode::new(148500, 1920, 2008, 2052, 2200, 1080, 1084, 1089, 1125, PP),
    // 1920x1200@60Hz
    Mode::new(193250, 1920, 2056, 2256, 2592, 1200, 1203, 1209, 1245, NP),
];

/// Timings only reachable through the EDID established timings bitmap.
#[rustfmt::skip]
const LEGACY_MODES: &[Mode] = &[
    // 720x400@70Hz
    Mode::new(28320, 720, 738, 846, 900, 400, 412, 414, 449, NP),
    // 720x400@88Hz
    Mode::new(35500, 720, 738, 846, 900, 400, 421, 423, 449, NN),
    // 640x480@67Hz
    Mode::new(30240, 640, 704, 768, 864, 480, 483, 486, 525, NN),
    // 832x624@75Hz
    Mode::new(57284, 832, 864, 928, 1152, 624, 625, 628, 667, NN),
    // 1152x870@75Hz
    Mode::new(100000, 1152, 1184, 1280, 1456, 870, 871, 874, 915, NN),
];

enum Source {
    Dmt(usize),
    Legacy(usize),
}

/// Established timings I and II, most significant bit of byte 0x23 first.
const ESTABLISHED: [Source; 17] = [
    Source::Legacy(0), // 720x400@70
    Source::Legacy(1), // 720x400@88
    Source::Dmt(0),    // 640x480@60
    Source::Legacy(2), // 640x480@67
    Source::Dmt(1),    // 640x480@72
    Source::Dmt(2),    // 640x480@75
    Source::Dmt(3),    // 800x600@56
    Source::Dmt(4),    // 800x600@60
    Source::Dmt(5),    // 800x600@72
    Source::Dmt(6),    // 800x600@75
    Source::Legacy(3), // 832x624@75
    Source::Dmt(7),    // 1024x768@87i
    Source::Dmt(8),    // 1024x768@60
    Source::Dmt(9),    // 1024x768@70
    Source::Dmt(10),   // 1024x768@75
    Source::Dmt(16),   // 1280x1024@75
    Source::Legacy(4), // 1152x870@75
];

/// Decodes the three established timing bytes (EDID offsets 0x23 to 0x25).
pub fn established_modes(bits: [u8; 3]) -> Vec<Mode> {
    let bitmap = (bits[0] as u32) << 16 | (bits[1] as u32) << 8 | bits[2] as u32;
    ESTABLISHED
        .iter()
        .enumerate()
        .filter(|(i, _)| bitmap & (1 << (23 - i)) != 0)
        .map(|(_, source)| match source {
            Source::Dmt(i) => DMT_MODES[*i],
            Source::Legacy(i) => LEGACY_MODES[*i],
        })
        .collect()
}

/// Finds the progressive DMT timing for a resolution and refresh rate.
pub fn find_dmt(hdisplay: u32, vdisplay: u32, vrefresh: u32) -> Option<Mode> {
    DMT_MODES
        .iter()
        .find(|m| {
            m.hdisplay == hdisplay
                && m.vdisplay == vdisplay
                && m.vrefresh() == vrefresh
                && !m.flags.contains(ModeFlags::INTERLACE)
        })
        .copied()
}

/// Every DMT mode that fits in `max_h`x`max_v` and refreshes at 61 Hz or less.
///
/// Used when the sink cannot be identified, so only conservative timings are offered.
pub fn noedid_modes(max_h: u32, max_v: u32) -> Vec<Mode> {
    DMT_MODES
        .iter()
        .filter(|m| m.hdisplay <= max_h && m.vdisplay <= max_v)
        .filter(|m| m.vrefresh() <= NOEDID_MAX_REFRESH)
        .copied()
        .collect()
}

/// Marks modes of exactly `hpref`x`vpref` as preferred.
pub fn set_preferred(modes: &mut [Mode], hpref: u32, vpref: u32) {
    for mode in modes
        .iter_mut()
        .filter(|m| m.hdisplay == hpref && m.vdisplay == vpref)
    {
        mode.preferred = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dmt_table_is_sane() {
        for mode in DMT_MODES.iter().chain(LEGACY_MODES) {
            assert!(mode.has_sane_timings(), "{}", mode);
        }
    }

    #[test]
    fn noedid_respects_size_and_refresh() {
        let modes = noedid_modes(1920, 1080);
        let names: Vec<String> = modes.iter().map(|m| m.name()).collect();
        assert_eq!(
            names,
            [
                "640x480", "800x600", "800x600", "1024x768", "1280x720", "1280x800",
                "1280x960", "1280x1024", "1360x768", "1440x900", "1600x900", "1680x1050",
                "1920x1080",
            ]
        );
        assert!(modes.iter().all(|m| m.vrefresh() <= NOEDID_MAX_REFRESH));
    }

    #[test]
    fn preferred_marks_matching_size_only() {
        let mut modes = noedid_modes(1920, 1080);
        set_preferred(&mut modes, 1280, 720);
        let preferred: Vec<&Mode> = modes.iter().filter(|m| m.preferred).collect();
        assert_eq!(preferred.len(), 1);
        assert_eq!(preferred[0].clock_khz, 74250);
    }

    #[test]
    fn established_bits_map_to_modes() {
        // 640x480@60, 800x600@60 and 1024x768@60.
        let modes = established_modes([0x21, 0x08, 0x00]);
        let summary: Vec<(u32, u32, u32)> = modes
            .iter()
            .map(|m| (m.hdisplay, m.vdisplay, m.vrefresh()))
            .collect();
        assert_eq!(summary, [(640, 480, 60), (800, 600, 60), (1024, 768, 60)]);
    }

    #[test]
    fn find_dmt_skips_interlaced() {
        assert_eq!(find_dmt(1920, 1080, 60).map(|m| m.clock_khz), Some(148500));
        assert!(find_dmt(1024, 768, 87).is_none());
        assert!(find_dmt(1234, 567, 60).is_none());
    }
}
