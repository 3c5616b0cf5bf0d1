//! Dallas/Maxim checksums used on the 1-Wire bus

/// CRC8 (x^8 + x^5 + x^4 + 1, reflected), as used in ROM codes and scratchpads
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        let mut b = byte;
        for _ in 0..8 {
            let mix = (crc ^ b) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            b >>= 1;
        }
    }
    crc
}

/// CRC16 (x^16 + x^15 + x^2 + 1, reflected, zero seed)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Check a CRC16 trailer as transmitted by a device: inverted, LSB first
pub fn crc16_matches(data: &[u8], trailer: [u8; 2]) -> bool {
    !crc16(data) == u16::from_le_bytes(trailer)
}

/// Build the inverted CRC16 trailer a device would append to `data`
pub fn crc16_trailer(data: &[u8]) -> [u8; 2] {
    (!crc16(data)).to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc8_rom_code() {
        // Reference ROM from the Maxim 1-Wire CRC application note
        let rom = [0x02, 0x1C, 0xB8, 0x01, 0x00, 0x00, 0x00];
        assert_eq!(crc8(&rom), 0xA2);

        let mut full = rom.to_vec();
        full.push(0xA2);
        assert_eq!(crc8(&full), 0);
    }

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0xBB3D);
    }

    #[test]
    fn test_crc16_trailer_roundtrip() {
        let data = [0xF0, 0x88, 0x00, 0xFF, 0x00, 0x12];
        let trailer = crc16_trailer(&data);
        assert!(crc16_matches(&data, trailer));
        assert!(!crc16_matches(&data[1..], trailer));
    }
}
