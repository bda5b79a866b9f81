use std::sync::Arc;
use std::thread;

use flash_patcher::{
    command::{Command, ProgramHeader},
    drivers::sim::{SimulatedFlash, PGSERR},
    run_request_loop, FlashDriver, SharedBuffer,
};

type Sim = SimulatedFlash<1024, 4>;

const BASE: u32 = 0x0800_0000;
const SECTOR: u32 = 256;

fn send<const N: usize>(buf: &SharedBuffer<N>, cmd: Command) {
    let mut bytes = [0u8; 32];
    let len = cmd.encode(&mut bytes).unwrap();
    buf.push_blocking(&bytes[..len]);
}

fn send_words<const N: usize>(buf: &SharedBuffer<N>, words: &[u32]) {
    for w in words {
        buf.push_blocking(&w.to_le_bytes());
    }
}

fn image(len: usize) -> Vec<u32> {
    (0..len as u32).map(|i| i.wrapping_mul(0x0101_0101) ^ 0xA5A5_0000).collect()
}

#[test]
fn image_streams_through_a_buffer_smaller_than_one_burst() {
    // 16 bytes of ring, 32 bytes per burst: the host has to wait for the
    // agent on every burst
    let buf = Arc::new(SharedBuffer::<16>::new());
    let mut flash = Sim::new(BASE, SECTOR);
    let start = flash.sector_start(0, 0);
    let data = image(256);

    let host = {
        let buf = Arc::clone(&buf);
        let data = data.clone();
        thread::spawn(move || {
            send(&buf, Command::EraseSector { bank: 0, first: 0, count: 5 });
            send(
                &buf,
                Command::ProgramWords(ProgramHeader {
                    bank: 0,
                    address: start,
                    burst: 8,
                    total: 256,
                    repeat: 64,
                }),
            );
            send_words(&buf, &data);
            send(&buf, Command::FlushCache);
            send(&buf, Command::End);
        })
    };

    assert_eq!(run_request_loop(&*buf, &mut flash), 0);
    host.join().unwrap();

    assert_eq!(buf.status(), 0);
    assert_eq!(buf.requests_processed(), 4);
    assert_eq!(buf.pending(), 0);

    for (i, w) in data.iter().enumerate() {
        assert_eq!(flash.read_word(start + 4 * i as u32), *w, "word {}", i);
    }
    // Tail repeats the last burst over the fifth sector
    for i in 0..64u32 {
        let expected = data[248 + (i as usize % 8)];
        assert_eq!(flash.read_word(start + 1024 + 4 * i), expected);
    }
    assert_eq!(flash.read_word(start + 1280), 0xFFFF_FFFF);
}

#[test]
fn second_bank_is_addressed_separately() {
    let buf = SharedBuffer::<256>::new();
    let mut flash = Sim::new(BASE, SECTOR).with_banks(2);
    let target = flash.sector_start(1, 0);

    // Fill bank 0 sector 0 first so an erase on the wrong bank would show
    send(&buf, Command::ProgramWords(ProgramHeader { bank: 0, address: BASE, burst: 4, total: 4, repeat: 0 }));
    send_words(&buf, &[1, 2, 3, 4]);
    send(&buf, Command::EraseSector { bank: 1, first: 0, count: 1 });
    send(&buf, Command::ProgramWords(ProgramHeader { bank: 1, address: target, burst: 4, total: 4, repeat: 0 }));
    send_words(&buf, &[5, 6, 7, 8]);
    send(&buf, Command::End);

    assert_eq!(run_request_loop(&buf, &mut flash), 0);
    assert_eq!(flash.read_word(BASE), 1);
    assert_eq!(flash.read_word(target + 12), 8);
}

#[test]
fn failure_leaves_the_rest_of_the_stream_alone() {
    let buf = SharedBuffer::<256>::new();
    let mut flash = Sim::new(BASE, SECTOR);

    send(&buf, Command::EraseSector { bank: 0, first: 0, count: 1 });
    // Past the end of the device
    send(&buf, Command::EraseSector { bank: 0, first: 15, count: 2 });
    send(&buf, Command::EraseSector { bank: 0, first: 1, count: 1 });
    send(&buf, Command::End);

    assert_eq!(run_request_loop(&buf, &mut flash), PGSERR.get());
    assert_eq!(buf.status(), PGSERR.get());
    assert_eq!(buf.requests_processed(), 1);
    assert_eq!(buf.pending(), 13 + 1);
    assert_eq!(flash.stats().completes, 0);
}

#[test]
fn host_can_restart_after_a_failure() {
    let mut flash = Sim::new(BASE, SECTOR);

    let first = SharedBuffer::<64>::new();
    first.push_blocking(&[0x00, 0x01, 0x02]);
    assert_eq!(run_request_loop(&first, &mut flash), -2);

    let second = SharedBuffer::<64>::new();
    send(&second, Command::EraseSector { bank: 0, first: 2, count: 1 });
    send(&second, Command::End);
    assert_eq!(run_request_loop(&second, &mut flash), 0);
    assert_eq!(second.requests_processed(), 2);
    assert_eq!(flash.stats().inits, 2);
}
