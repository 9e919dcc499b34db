mod file_page_loader;

use std::{env, ops::Range, str::FromStr};

use log::{error, info};
use vmm::{AddressSpace, MachineConfig, MemoryImage, Mmu, ReplacementPolicy, VmError};

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, VmError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| VmError::InvalidConfig(format!("{}={:?} is not valid", name, value))),
        Err(_) => Ok(default),
    }
}

fn config_from_env() -> Result<MachineConfig, VmError> {
    let defaults = MachineConfig::default()
        .with_page_size(16)
        .with_frames(4)
        .with_swap_slots(16);

    let config = MachineConfig {
        page_size: env_or("VMM_PAGE_SIZE", defaults.page_size)?,
        frame_count: env_or("VMM_FRAMES", defaults.frame_count)?,
        swap_slot_count: env_or("VMM_SWAP_SLOTS", defaults.swap_slot_count)?,
        tlb_capacity: env_or("VMM_TLB_SIZE", defaults.tlb_capacity)?,
        page_policy: env_or::<ReplacementPolicy>("VMM_PAGE_POLICY", defaults.page_policy)?,
        tlb_policy: env_or::<ReplacementPolicy>("VMM_TLB_POLICY", defaults.tlb_policy)?,
    };

    config.validate()?;

    Ok(config)
}

/// Imagem de brinquedo: cada byte da página `n` vale `n`.
fn stub_image(pages: usize, page_size: usize) -> MemoryImage {
    MemoryImage::new((0..pages * page_size).map(|i| (i / page_size) as u8).collect())
}

/// Páginas de código (somente leitura). Imagens pequenas demais ficam sem
/// nenhuma, para sobrar pelo menos uma página gravável.
fn code_pages(page_count: usize) -> Range<usize> {
    if page_count > 2 {
        0..2
    } else {
        0..0
    }
}

fn dump_page(mmu: &mut Mmu, vpn: usize) -> Result<(), VmError> {
    let page_size = mmu.config().page_size;
    let mut buf = vec![0u8; page_size];

    mmu.read_bytes(vpn * page_size, &mut buf)?;

    println!("page {:#04X}: {}", vpn, hex::encode(&buf));

    Ok(())
}

fn run() -> Result<(), VmError> {
    let config = config_from_env()?;
    let page_size = config.page_size;

    let space = match env::args().nth(1) {
        Some(path) => {
            let image = file_page_loader::FilePageLoader::new(&path)?;
            AddressSpace::for_image(image, page_size)?
        }
        None => AddressSpace::new(12, stub_image(12, page_size)),
    };

    let page_count = space.page_count();
    let code = code_pages(page_count);
    let space = space.with_read_only_pages(code.clone());

    let mut mmu = Mmu::new(config)?;
    let id = mmu.create_space(space);

    let writable = code.end;
    let message = b"hello, swap!";

    mmu.write_bytes(writable * page_size, &message[..message.len().min(page_size)])?;

    for vpn in 0..page_count {
        mmu.read_byte(vpn * page_size)?;
    }

    dump_page(&mut mmu, writable)?;
    dump_page(&mut mmu, page_count - 1)?;

    if !code.is_empty() {
        if let Err(err) = mmu.write_byte(0, 0xFF) {
            info!("write to code page refused: {}", err);
        }
    }

    mmu.check_invariants()?;

    let stats = mmu.pager_stats();
    println!(
        "image loads: {}    swap ins: {}    swap outs: {}",
        stats.image_loads, stats.swap_ins, stats.swap_outs
    );

    if let Some(tlb) = mmu.tlb_stats() {
        println!(
            "TLB hit: {}    TLB miss: {}    Hitting rate: {:.5}",
            tlb.hits,
            tlb.misses,
            tlb.hit_rate()
        );
    }

    mmu.destroy_space(id)?;

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run() {
        error!("{}", err);
        std::process::exit(1);
    }
}
