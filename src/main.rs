use std::{
    collections::BTreeMap,
    env, fs,
    io::Write,
    path::{Path, PathBuf},
};

use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

mod counter;
mod ledger;
mod txn;

use counter::CounterRecord;
use ledger::{LedgerRuntime, MemoryStore, Operation, SlotId, SlotStore};
use txn::{SignedTransaction, Transaction};

//==================== Ledger manifest ====================//

#[derive(Serialize, Deserialize)]
struct LedgerFile {
    version: u8,
    height: u64,
    slots: BTreeMap<String, String>, // slot id (hex) → 48-byte record (hex)
    applied: Vec<String>,            // digests of applied transactions (hex)
}

impl LedgerFile {
    fn empty() -> Self {
        Self {
            version: 1,
            height: 0,
            slots: BTreeMap::new(),
            applied: Vec::new(),
        }
    }
}

//==================== Shared helpers ====================//

fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    let s = s.trim();
    hex::decode(s).map_err(|e| format!("{e}"))
}

fn decode_hex32(name: &str, value: &str) -> [u8; 32] {
    let bytes = match hex_decode(value) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("error: invalid {name}: {err}");
            std::process::exit(2);
        }
    };
    if bytes.len() != 32 {
        eprintln!("error: {name} must be 32 bytes (64 hex chars)");
        std::process::exit(2);
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    arr
}

fn read_all(p: &Path) -> Vec<u8> {
    fs::read(p).expect("read file")
}

fn write_all(p: &Path, bytes: &[u8]) {
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).ok();
    }
    let mut f = fs::File::create(p).expect("create file");
    f.write_all(bytes).expect("write file");
}

fn usage() -> ! {
    eprintln!(
        "Usage:
  tally keygen    --out-dir=<dir>
  tally init      <ledger_file> --sk-hex=<64-hex-secret> [--slot-hex=<64hex>]
  tally increment <ledger_file> --slot-hex=<64hex> --sk-hex=<64-hex-secret>
  tally decrement <ledger_file> --slot-hex=<64hex> --sk-hex=<64-hex-secret>
  tally reset     <ledger_file> --slot-hex=<64hex> --sk-hex=<64-hex-secret>
  tally show      <ledger_file> --slot-hex=<64hex>

Notes:
  - <ledger_file> is a JSON manifest holding the slot records; init creates it
  - sk-hex — 32-byte Ed25519 secret key in hex (exactly 64 hex chars)
  - increment/decrement accept any caller key; reset only the record authority
  - slot ids are 32 bytes; init picks a random slot when --slot-hex is omitted"
    );
    std::process::exit(1)
}

fn arg_flag(args: &[String], name: &str) -> Option<String> {
    for a in args {
        if let Some(rest) = a.strip_prefix(&format!("--{}=", name)) {
            return Some(rest.to_string());
        }
    }
    None
}

#[inline]
fn require_flag(args: &[String], name: &str) -> String {
    if let Some(v) = arg_flag(args, name) {
        return v;
    }
    eprintln!("error: missing --{name}\n");
    usage();
}

fn parse_sk_hex(sk_hex: &str) -> SigningKey {
    let sk_bytes = match hex_decode(sk_hex) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("error: invalid sk-hex: {err}");
            std::process::exit(2);
        }
    };
    if sk_bytes.len() != 32 {
        eprintln!("error: sk-hex must be 32 bytes (64 hex chars)");
        std::process::exit(2);
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&sk_bytes);
    SigningKey::from_bytes(&arr)
}

//==================== Ledger file I/O ====================//

fn load_runtime(path: &Path) -> LedgerRuntime<MemoryStore> {
    if !path.exists() {
        return LedgerRuntime::new(MemoryStore::new());
    }
    let bytes = read_all(path);
    let file: LedgerFile = serde_json::from_slice(&bytes).expect("ledger parse");

    let mut store = MemoryStore::new();
    for (slot_hex, record_hex) in &file.slots {
        let slot = decode_hex32("slot id in ledger file", slot_hex);
        let record_bytes = match hex_decode(record_hex) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!("error: invalid record hex in ledger file: {err}");
                std::process::exit(2);
            }
        };
        let record = match CounterRecord::decode(&record_bytes) {
            Some(record) => record,
            None => {
                eprintln!(
                    "error: slot {} does not hold a counter record",
                    hex::encode(slot)
                );
                std::process::exit(2);
            }
        };
        store.store(&slot, &record);
    }

    let applied: Vec<[u8; 32]> = file
        .applied
        .iter()
        .map(|digest_hex| decode_hex32("digest in ledger file", digest_hex))
        .collect();
    LedgerRuntime::restore(store, file.height, applied)
}

fn save_runtime(path: &Path, runtime: &LedgerRuntime<MemoryStore>) {
    let mut file = LedgerFile::empty();
    file.height = runtime.height;
    for (slot, record) in runtime.store().slots() {
        file.slots
            .insert(hex::encode(slot), hex::encode(record.encode()));
    }
    file.applied = runtime.applied_digests().map(hex::encode).collect();
    let json = serde_json::to_vec_pretty(&file).expect("ledger json");
    write_all(path, &json);
}

fn submit_op(path: &Path, sk: &SigningKey, slot: SlotId, op: Operation) {
    let mut runtime = load_runtime(path);
    let txn = Transaction {
        slot,
        op,
        nonce: OsRng.next_u64(),
    };
    match runtime.submit(&SignedTransaction::sign(sk, txn)) {
        Ok(record) => {
            save_runtime(path, &runtime);
            println!("slot {} count → {}", hex::encode(slot), record.count);
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    }
}

//==================== Commands ====================//

fn keygen_cmd(args: &[String]) {
    let out_dir = PathBuf::from(require_flag(args, "out-dir"));
    fs::create_dir_all(&out_dir).expect("mkdir out-dir");

    let mut sk_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut sk_bytes);
    let sk = SigningKey::from_bytes(&sk_bytes);
    let pk = sk.verifying_key();

    write_all(&out_dir.join("sk.hex"), hex::encode(sk_bytes).as_bytes());
    write_all(
        &out_dir.join("pk.hex"),
        hex::encode(pk.as_bytes()).as_bytes(),
    );
    println!("keypair written → {}", out_dir.display());
}

fn init_cmd(args: &[String]) {
    if args.is_empty() {
        usage();
    }
    let ledger_path = PathBuf::from(&args[0]);
    let sk = parse_sk_hex(&require_flag(args, "sk-hex"));
    let slot: SlotId = match arg_flag(args, "slot-hex") {
        Some(value) => decode_hex32("--slot-hex", &value),
        None => {
            let mut slot = [0u8; 32];
            OsRng.fill_bytes(&mut slot);
            slot
        }
    };
    submit_op(&ledger_path, &sk, slot, Operation::Initialize);
}

fn mutate_cmd(args: &[String], op: Operation) {
    if args.is_empty() {
        usage();
    }
    let ledger_path = PathBuf::from(&args[0]);
    let slot = decode_hex32("--slot-hex", &require_flag(args, "slot-hex"));
    let sk = parse_sk_hex(&require_flag(args, "sk-hex"));
    submit_op(&ledger_path, &sk, slot, op);
}

fn show_cmd(args: &[String]) {
    if args.is_empty() {
        usage();
    }
    let ledger_path = PathBuf::from(&args[0]);
    let slot = decode_hex32("--slot-hex", &require_flag(args, "slot-hex"));
    let runtime = load_runtime(&ledger_path);
    match runtime.record(&slot) {
        Some(record) => {
            println!("slot      {}", hex::encode(slot));
            println!("count     {}", record.count);
            println!("authority {}", hex::encode(record.authority));
        }
        None => {
            eprintln!("error: unknown slot {}", hex::encode(slot));
            std::process::exit(2);
        }
    }
}

//==================== main ====================//

fn main() {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }
    if args.len() == 1 && (args[0] == "help" || args[0] == "--help" || args[0] == "-h") {
        usage();
    }
    let cmd = args.remove(0);
    match cmd.as_str() {
        "keygen" => keygen_cmd(&args),
        "init" => init_cmd(&args),
        "increment" => mutate_cmd(&args, Operation::Increment),
        "decrement" => mutate_cmd(&args, Operation::Decrement),
        "reset" => mutate_cmd(&args, Operation::Reset),
        "show" => show_cmd(&args),
        _ => usage(),
    }
}
