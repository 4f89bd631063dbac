//! Property-based checks of the translation arithmetic: a successful mapping
//! always lands at `par * 64 + (vaddr & 0o17777)`, and no access ever
//! succeeds against a non-resident page.

use proptest::prelude::*;

use kt11::{Kt11, ModeSource, PDR_EXPAND_DOWN, PDR_RESIDENT, PDR_WRITABLE};
use qbus::BusDevice;

const MMR0: u32 = 0o777572;
const KISA: u32 = 0o772340;
const KISD: u32 = 0o772300;

struct KernelPsw;

impl ModeSource for KernelPsw {
    fn current_mode(&self) -> u16 {
        0
    }

    fn previous_mode(&self) -> u16 {
        0
    }
}

#[derive(Clone, Debug)]
struct Page {
    par: u16,
    length: u16,
    resident: bool,
    writable: bool,
    expand_down: bool,
}

prop_compose! {
    fn arb_page()(
        par in 0u16..0o10000,
        length in 0u16..0o200,
        resident in any::<bool>(),
        writable in any::<bool>(),
        expand_down in any::<bool>(),
    ) -> Page {
        Page { par, length, resident, writable, expand_down }
    }
}

fn configure(page: &Page, index: u32) -> Kt11 {
    let kt11 = Kt11::new();
    let mut pdr = page.length << 8;
    if page.resident {
        pdr |= PDR_RESIDENT;
    }
    if page.writable {
        pdr |= PDR_WRITABLE;
    }
    if page.expand_down {
        pdr |= PDR_EXPAND_DOWN;
    }
    kt11.write(KISA + index * 2, page.par).unwrap();
    kt11.write(KISD + index * 2, pdr).unwrap();
    kt11.write(MMR0, 1).unwrap();
    kt11
}

fn in_bounds(page: &Page, block: u16) -> bool {
    if page.expand_down {
        block >= page.length
    } else {
        block <= page.length
    }
}

proptest! {
    #[test]
    fn successful_translations_match_the_par_arithmetic(
        page in arb_page(),
        vaddr in any::<u16>(),
        is_write in any::<bool>(),
    ) {
        let index = u32::from((vaddr >> 13) & 0o7);
        let block = (vaddr >> 6) & 0o177;
        let kt11 = configure(&page, index);

        let expected_ok = in_bounds(&page, block)
            && page.resident
            && (!is_write || page.writable);

        let got = kt11.map(vaddr, is_write, false, false, &KernelPsw);
        prop_assert_eq!(got.is_ok(), expected_ok);
        if let Ok(paddr) = got {
            prop_assert_eq!(
                paddr,
                u32::from(page.par) * 64 + u32::from(vaddr & 0o17777)
            );
        }
    }

    #[test]
    fn nonresident_pages_never_translate(vaddr in any::<u16>(), length in 0u16..0o200) {
        let index = u32::from((vaddr >> 13) & 0o7);
        let page = Page {
            par: 0,
            length,
            resident: false,
            writable: true,
            expand_down: false,
        };
        let kt11 = configure(&page, index);
        prop_assert!(kt11.map(vaddr, false, false, false, &KernelPsw).is_err());
        prop_assert!(kt11.map(vaddr, true, false, false, &KernelPsw).is_err());
    }
}
