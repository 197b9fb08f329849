// 分片MP4（fMP4）流切分
//
// ffmpeg 以 `frag_keyframe+empty_moov` 输出的字节流由顶层 box 组成：
// ftyp、moov 构成初始化分片，之后每组 moof + mdat 构成一个媒体分片。

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// 单个 box 的最大长度
const MAX_BOX_SIZE: u64 = 64 * 1024 * 1024;

/// 视觉类 sample entry 在子 box 之前的固定字段长度
const VISUAL_SAMPLE_ENTRY_LEN: usize = 78;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Fmp4Error {
    #[error("invalid box size {size} for '{kind}'")]
    InvalidBoxSize { kind: String, size: u64 },

    #[error("box '{kind}' too large: {size} bytes")]
    BoxTooLarge { kind: String, size: u64 },

    #[error("box '{0}' extends to end of stream")]
    Unbounded(String),
}

/// 切分结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fmp4Item {
    /// 初始化分片及其编码描述
    Init { codec: String, segment: Bytes },
    /// 媒体分片
    Fragment(Bytes),
}

/// fMP4 流切分器
#[derive(Debug, Default)]
pub struct Fmp4Splitter {
    pending: BytesMut,
    init: BytesMut,
    fragment: BytesMut,
    init_done: bool,
}

impl Fmp4Splitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入新数据，返回已完整的分片
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Fmp4Item>, Fmp4Error> {
        self.pending.extend_from_slice(data);
        let mut items = Vec::new();

        while let Some((kind, size)) = peek_box(&self.pending)? {
            if (self.pending.len() as u64) < size {
                break;
            }
            let full = self.pending.split_to(size as usize).freeze();

            match &kind {
                b"ftyp" => self.init.extend_from_slice(&full),
                b"moov" => {
                    self.init.extend_from_slice(&full);
                    let codec = codec_string(&full).unwrap_or_else(|| "avc1".to_string());
                    items.push(Fmp4Item::Init {
                        codec,
                        segment: self.init.split().freeze(),
                    });
                    self.init_done = true;
                }
                b"mdat" if self.init_done => {
                    self.fragment.extend_from_slice(&full);
                    items.push(Fmp4Item::Fragment(self.fragment.split().freeze()));
                }
                b"mfra" => {}
                _ if self.init_done => self.fragment.extend_from_slice(&full),
                _ => self.init.extend_from_slice(&full),
            }
        }

        Ok(items)
    }
}

/// 读取 box 头，数据不足时返回 `None`
fn peek_box(data: &[u8]) -> Result<Option<([u8; 4], u64)>, Fmp4Error> {
    if data.len() < 8 {
        return Ok(None);
    }
    let mut head = &data[..];
    let size32 = head.get_u32();
    let mut kind = [0u8; 4];
    head.copy_to_slice(&mut kind);
    let kind_str = String::from_utf8_lossy(&kind).into_owned();

    let size = match size32 {
        0 => return Err(Fmp4Error::Unbounded(kind_str)),
        1 => {
            if data.len() < 16 {
                return Ok(None);
            }
            let size = head.get_u64();
            if size < 16 {
                return Err(Fmp4Error::InvalidBoxSize { kind: kind_str, size });
            }
            size
        }
        n if n < 8 => {
            return Err(Fmp4Error::InvalidBoxSize {
                kind: kind_str,
                size: n as u64,
            })
        }
        n => n as u64,
    };

    if size > MAX_BOX_SIZE {
        return Err(Fmp4Error::BoxTooLarge { kind: kind_str, size });
    }
    Ok(Some((kind, size)))
}

/// 遍历一段数据中的子 box，返回 (类型, 负载)
fn child_boxes(mut data: &[u8]) -> Vec<([u8; 4], &[u8])> {
    let mut boxes = Vec::new();
    while data.len() >= 8 {
        let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let kind = [data[4], data[5], data[6], data[7]];
        let (header_len, size) = match size {
            0 => (8, data.len()),
            1 if data.len() >= 16 => {
                let mut large = [0u8; 8];
                large.copy_from_slice(&data[8..16]);
                (16, u64::from_be_bytes(large) as usize)
            }
            _ => (8, size),
        };
        if size < header_len || size > data.len() {
            break;
        }
        boxes.push((kind, &data[header_len..size]));
        data = &data[size..];
    }
    boxes
}

fn find_child<'a>(data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
    child_boxes(data)
        .into_iter()
        .find(|(k, _)| k == kind)
        .map(|(_, payload)| payload)
}

/// 从完整的 moov box 中提取 RFC 6381 编码描述
///
/// H.264 返回 `avc1.PPCCLL`，其他编码返回 sample entry 的类型。
pub fn codec_string(moov: &[u8]) -> Option<String> {
    let (kind, payload) = child_boxes(moov).into_iter().next()?;
    if &kind != b"moov" {
        return None;
    }

    for (kind, trak) in child_boxes(payload) {
        if &kind != b"trak" {
            continue;
        }
        let stsd = find_child(trak, b"mdia")
            .and_then(|mdia| find_child(mdia, b"minf"))
            .and_then(|minf| find_child(minf, b"stbl"))
            .and_then(|stbl| find_child(stbl, b"stsd"));
        // version/flags + entry_count
        let Some(entries) = stsd.and_then(|stsd| stsd.get(8..)) else {
            continue;
        };

        for (entry_kind, entry) in child_boxes(entries) {
            match &entry_kind {
                b"avc1" | b"avc3" => {
                    let fourcc = String::from_utf8_lossy(&entry_kind).into_owned();
                    let avcc = entry
                        .get(VISUAL_SAMPLE_ENTRY_LEN..)
                        .and_then(|children| find_child(children, b"avcC"));
                    return Some(match avcc {
                        Some(avcc) if avcc.len() >= 4 => {
                            format!("{}.{:02x}{:02x}{:02x}", fourcc, avcc[1], avcc[2], avcc[3])
                        }
                        _ => fourcc,
                    });
                }
                b"hvc1" | b"hev1" | b"av01" | b"vp09" => {
                    return Some(String::from_utf8_lossy(&entry_kind).into_owned());
                }
                _ => {}
            }
        }
    }
    None
}
