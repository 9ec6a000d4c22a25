//! Dump LUKS header information, similar to `cryptsetup luksDump`.

use std::env;

use luks_rs::{open, LuksDevice, Result};

fn dump(device_path: &str) -> Result<()> {
    let device = open(device_path)?;

    println!("LUKS header information for {}", device_path);
    println!();
    println!("{:<16}{}", "Version:", device.version());
    println!("{:<16}{}", "UUID:", device.uuid());

    match &device {
        LuksDevice::Luks1(d) => {
            println!("{:<16}{}", "Cipher name:", d.cipher_name()?);
            println!("{:<16}{}", "Cipher mode:", d.cipher_mode()?);
            println!("{:<16}{}", "Hash spec:", d.hash_spec()?);
            println!("{:<16}{}", "Payload offset:", d.payload_offset());
            println!("{:<16}{}", "MK bits:", d.mk_bits());
        }
        LuksDevice::Luks2(d) => {
            if let Some(label) = d.label()? {
                println!("{:<16}{}", "Label:", label);
            }
            println!("{:<16}{}", "Sequence id:", d.sequence_id());
            for (id, segment) in &d.metadata().segments {
                println!(
                    "Segment {}: {} at {} ({} byte sectors)",
                    id, segment.encryption, segment.offset, segment.sector_size
                );
            }
        }
    }

    println!();
    println!("Key slots: {:?}", device.slots());

    for token in device.tokens()? {
        let type_: &str = if token.token_type.is_empty() {
            "(unknown)"
        } else {
            &token.token_type
        };
        println!(
            "Token {}: {} for slots {:?}, {} payload bytes",
            token.id,
            type_,
            token.slots,
            token.payload.len()
        );
    }

    Ok(())
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() != 1 {
        println!("Usage: luks_dump <device path>");
        std::process::exit(1);
    }

    if let Err(e) = dump(args[0].as_str()) {
        println!("Error: {}", e);
        std::process::exit(2);
    }
}
