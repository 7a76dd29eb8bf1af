//! Helpers to parse the class of device.

pub const COD_MAJOR_PERIPHERAL: u32 = 0x05;

struct Class {
    major: u32,
    minor: u32,
}

impl Class {
    fn new(cod: u32) -> Class {
        Class { major: (cod & 0x1f00) >> 8, minor: (cod & 0xff) }
    }
}

pub fn is_cod_hid_keyboard(cod: u32) -> bool {
    let c = Class::new(cod);
    c.major == COD_MAJOR_PERIPHERAL && ((c.minor >> 6) & 0x03) == 0x01
}

pub fn is_cod_hid_combo(cod: u32) -> bool {
    let c = Class::new(cod);
    c.major == COD_MAJOR_PERIPHERAL && ((c.minor >> 6) & 0x03) == 0x03
}

/// True for keyboards and keyboard/pointer combos, which pair by typing a displayed PIN.
pub fn is_cod_keyboard_like(cod: u32) -> bool {
    is_cod_hid_keyboard(cod) || is_cod_hid_combo(cod)
}

#[cfg(test)]
mod tests {
    use crate::cod::{is_cod_hid_combo, is_cod_hid_keyboard, is_cod_keyboard_like};

    #[test]
    fn test_cod() {
        let keyboard_cod = 0x0540;
        let keyboard_pointing_cod = 0x05c0;
        let mouse_cod = 0x0580;
        let phone_cod = 0x5a020c;

        assert_eq!(is_cod_hid_keyboard(keyboard_cod), true);
        assert_eq!(is_cod_hid_combo(keyboard_cod), false);
        assert_eq!(is_cod_hid_combo(keyboard_pointing_cod), true);
        assert_eq!(is_cod_keyboard_like(keyboard_pointing_cod), true);
        assert_eq!(is_cod_keyboard_like(mouse_cod), false);
        assert_eq!(is_cod_keyboard_like(phone_cod), false);
    }
}
