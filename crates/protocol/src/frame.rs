//! Media-Frame-Layout (UDP)
//!
//! Beschreibt die Byte-Bereiche eines verschluesselten Voice-Pakets, ohne
//! den Puffer zu besitzen. Alle Mehrbyte-Felder sind big-endian.
//!
//! ## Paketformat
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Version
//!  1       1   PacketType (0 = Audio, 1 = Silence)
//!  2       2   Flags (big-endian)
//!  4       4   SequenzNummer (big-endian)
//!  8       4   Zeitstempel (big-endian, 48 kHz-Ticks)
//! 12       4   SSRC (big-endian)
//! 16       4   [optional, Flag EXTENSION] Profil(2) + Laenge in 32-Bit-Worten(2)
//! 20     4*L   [optional] Extension-Daten
//!  H       8   Nonce: Epoch(4) + Zaehler(4)
//!  H+8     N   Ciphertext + Auth-Tag(16)
//! ```
//!
//! Header und Extension sind Associated Data: authentifiziert, nicht
//! verschluesselt.

use std::ops::Range;

use crate::error::{ProtocolError, ProtocolResult};

/// Aktuelle Protokollversion
pub const PROTOKOLL_VERSION: u8 = 1;

/// Laenge der Nonce-Region im Paket
pub const NONCE_LAENGE: usize = 8;

/// Laenge des AEAD-Tags am Ende der Voice-Daten
pub const TAG_LAENGE: usize = 16;

/// Praefix einer Extension (Profil + Laenge)
pub const EXTENSION_PRAEFIX: usize = 4;

/// Kleinstes gueltiges Paket: Header + Nonce + Tag (leerer Klartext)
pub const MIN_FRAME_LAENGE: usize = MediaHeader::SIZE + NONCE_LAENGE + TAG_LAENGE;

// ---------------------------------------------------------------------------
// Flags (u16, big-endian)
// ---------------------------------------------------------------------------

/// Bit-Masken fuer das Flags-Feld im Media-Header
pub struct MediaFlags;

impl MediaFlags {
    /// Beginn einer Sprechsequenz
    pub const SPEAKING_START: u16 = 0x0010;
    /// Ende einer Sprechsequenz
    pub const SPEAKING_STOP: u16 = 0x0020;
    /// Extension-Header folgt auf den festen Header
    pub const EXTENSION: u16 = 0x0040;
}

// ---------------------------------------------------------------------------
// PacketType
// ---------------------------------------------------------------------------

/// Art des Media-Paketes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Codec-Audio
    Audio = 0,
    /// Stille-Frame am Ende einer Sprechsequenz
    Silence = 1,
}

impl PacketType {
    /// Konvertiert ein Byte in einen `PacketType`.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Audio),
            1 => Some(Self::Silence),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// MediaHeader
// ---------------------------------------------------------------------------

/// Fester 16-Byte Header eines Media-Pakets
///
/// Direkte Byte-Serialisierung, kein serde (Performance-kritisch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaHeader {
    /// Protokollversion (muss == `PROTOKOLL_VERSION` sein)
    pub version: u8,
    pub packet_type: PacketType,
    /// Flags-Bitmask (siehe `MediaFlags`)
    pub flags: u16,
    /// Sequenznummer des Senders
    pub sequence: u32,
    /// RTP-kompatibler Zeitstempel (48 kHz-Ticks)
    pub timestamp: u32,
    pub ssrc: u32,
}

impl MediaHeader {
    /// Header-Groesse in Bytes
    pub const SIZE: usize = 16;

    pub fn new(packet_type: PacketType, flags: u16, sequence: u32, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: PROTOKOLL_VERSION,
            packet_type,
            flags,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Serialisiert den Header in ein 16-Byte-Array (big-endian)
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.version;
        buf[1] = self.packet_type as u8;
        buf[2..4].copy_from_slice(&self.flags.to_be_bytes());
        buf[4..8].copy_from_slice(&self.sequence.to_be_bytes());
        buf[8..12].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[12..16].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }

    /// Deserialisiert den festen Header
    ///
    /// # Fehler
    /// `MalformedFrame` bei zu kurzem Puffer, falscher Version oder
    /// unbekanntem PacketType.
    pub fn decode(buf: &[u8]) -> ProtocolResult<Self> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::malformed(format!(
                "Header zu kurz: {} Bytes (erwartet {})",
                buf.len(),
                Self::SIZE
            )));
        }

        let version = buf[0];
        if version != PROTOKOLL_VERSION {
            return Err(ProtocolError::malformed(format!(
                "Ungueltige Protokollversion: {} (erwartet {})",
                version, PROTOKOLL_VERSION
            )));
        }

        let packet_type = PacketType::from_u8(buf[1])
            .ok_or_else(|| ProtocolError::malformed(format!("Unbekannter PacketType: {}", buf[1])))?;

        Ok(Self {
            version,
            packet_type,
            flags: u16::from_be_bytes([buf[2], buf[3]]),
            sequence: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            timestamp: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            ssrc: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        })
    }

    /// Prueft ob ein bestimmtes Flag gesetzt ist
    pub fn hat_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }
}

// ---------------------------------------------------------------------------
// ExtensionHeader
// ---------------------------------------------------------------------------

/// Optionaler Extension-Header (RFC 3550, Abschnitt 5.3.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionHeader {
    pub profile: u16,
    /// Laenge muss ein Vielfaches von 4 sein
    pub data: Vec<u8>,
}

impl ExtensionHeader {
    /// Erstellt eine Extension; die Daten werden auf 32-Bit-Worte aufgefuellt
    pub fn new(profile: u16, mut data: Vec<u8>) -> Self {
        let rest = data.len() % 4;
        if rest != 0 {
            data.resize(data.len() + 4 - rest, 0);
        }
        Self { profile, data }
    }

    /// Laenge inkl. Praefix
    pub fn encoded_len(&self) -> usize {
        EXTENSION_PRAEFIX + self.data.len()
    }

    fn write_to(&self, out: &mut Vec<u8>) -> ProtocolResult<()> {
        let worte = u16::try_from(self.data.len() / 4)
            .map_err(|_| ProtocolError::malformed("Extension laenger als 65535 Worte"))?;
        out.extend_from_slice(&self.profile.to_be_bytes());
        out.extend_from_slice(&worte.to_be_bytes());
        out.extend_from_slice(&self.data);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FrameNonce
// ---------------------------------------------------------------------------

/// Nonce-Region eines Pakets: Epoch + Zaehler des Senders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameNonce {
    pub epoch: u32,
    pub counter: u32,
}

impl FrameNonce {
    pub fn new(epoch: u32, counter: u32) -> Self {
        Self { epoch, counter }
    }

    pub fn encode(&self) -> [u8; NONCE_LAENGE] {
        let mut buf = [0u8; NONCE_LAENGE];
        buf[0..4].copy_from_slice(&self.epoch.to_be_bytes());
        buf[4..8].copy_from_slice(&self.counter.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> ProtocolResult<Self> {
        if buf.len() != NONCE_LAENGE {
            return Err(ProtocolError::malformed(format!(
                "Nonce-Laenge {} (erwartet {})",
                buf.len(),
                NONCE_LAENGE
            )));
        }
        Ok(Self {
            epoch: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            counter: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }
}

// ---------------------------------------------------------------------------
// FrameInfo
// ---------------------------------------------------------------------------

/// Byte-Bereiche eines Pakets
///
/// `header` umfasst den festen Header und die Extension; zusammen mit
/// `nonce` und `voice_data` wird das Paket lueckenlos abgedeckt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub header: Range<usize>,
    /// Laenge der Extension inkl. Praefix (0 wenn keine vorhanden)
    pub extension_len: usize,
    pub nonce: Range<usize>,
    /// Ciphertext inkl. Auth-Tag
    pub voice_data: Range<usize>,
}

impl FrameInfo {
    /// Berechnet das Layout eines Pakets. Reine Funktion.
    ///
    /// # Fehler
    /// `MalformedFrame` wenn der Puffer kuerzer als der Header ist, die
    /// Version nicht stimmt oder eine angegebene Laenge ueber das
    /// Pufferende hinausreicht.
    pub fn compute(buf: &[u8]) -> ProtocolResult<Self> {
        if buf.len() < MediaHeader::SIZE {
            return Err(ProtocolError::malformed(format!(
                "Paket zu kurz: {} Bytes (Header {})",
                buf.len(),
                MediaHeader::SIZE
            )));
        }
        if buf[0] != PROTOKOLL_VERSION {
            return Err(ProtocolError::malformed(format!(
                "Ungueltige Protokollversion: {}",
                buf[0]
            )));
        }

        let flags = u16::from_be_bytes([buf[2], buf[3]]);
        let extension_len = if flags & MediaFlags::EXTENSION != 0 {
            let praefix_ende = MediaHeader::SIZE + EXTENSION_PRAEFIX;
            if buf.len() < praefix_ende {
                return Err(ProtocolError::malformed("Extension-Praefix abgeschnitten"));
            }
            let worte = u16::from_be_bytes([buf[18], buf[19]]) as usize;
            EXTENSION_PRAEFIX + worte * 4
        } else {
            0
        };

        let header_ende = MediaHeader::SIZE + extension_len;
        if header_ende > buf.len() {
            return Err(ProtocolError::malformed(format!(
                "Extension ({} Bytes) ueberschreitet Paketlaenge {}",
                extension_len,
                buf.len()
            )));
        }

        let nonce_ende = header_ende + NONCE_LAENGE;
        if nonce_ende + TAG_LAENGE > buf.len() {
            return Err(ProtocolError::malformed(format!(
                "Kein Platz fuer Nonce und Auth-Tag: {} Bytes",
                buf.len()
            )));
        }

        Ok(Self {
            header: 0..header_ende,
            extension_len,
            nonce: header_ende..nonce_ende,
            voice_data: nonce_ende..buf.len(),
        })
    }

    /// Bereich des festen Headers
    pub fn fixed_header(&self) -> Range<usize> {
        0..MediaHeader::SIZE
    }

    /// Bereich der Extension (leer wenn keine vorhanden)
    pub fn extension(&self) -> Range<usize> {
        MediaHeader::SIZE..MediaHeader::SIZE + self.extension_len
    }

    /// Gesamtlaenge des beschriebenen Pakets
    pub fn total_len(&self) -> usize {
        self.voice_data.end
    }
}

// ---------------------------------------------------------------------------
// MediaFrame – geparste Sicht auf einen Puffer
// ---------------------------------------------------------------------------

/// Geparstes Paket; leiht den Empfangspuffer
#[derive(Debug, Clone)]
pub struct MediaFrame<'a> {
    pub info: FrameInfo,
    pub header: MediaHeader,
    pub nonce: FrameNonce,
    buf: &'a [u8],
}

impl<'a> MediaFrame<'a> {
    /// Layout berechnen und Header/Nonce lesen
    pub fn parse(buf: &'a [u8]) -> ProtocolResult<Self> {
        let info = FrameInfo::compute(buf)?;
        let header = MediaHeader::decode(&buf[info.fixed_header()])?;
        let nonce = FrameNonce::decode(&buf[info.nonce.clone()])?;
        Ok(Self {
            info,
            header,
            nonce,
            buf,
        })
    }

    /// Header + Extension (Associated Data)
    pub fn associated_data(&self) -> &'a [u8] {
        &self.buf[self.info.header.clone()]
    }

    /// Ciphertext inkl. Tag
    pub fn voice_data(&self) -> &'a [u8] {
        &self.buf[self.info.voice_data.clone()]
    }

    /// Extension-Daten ohne Praefix
    pub fn extension_data(&self) -> &'a [u8] {
        let bereich = self.info.extension();
        if bereich.is_empty() {
            return &[];
        }
        &self.buf[bereich.start + EXTENSION_PRAEFIX..bereich.end]
    }
}

// ---------------------------------------------------------------------------
// Paket zusammensetzen
// ---------------------------------------------------------------------------

/// Serialisiert Header und optionale Extension (die Associated Data).
///
/// Das Flag `EXTENSION` wird passend zur Extension gesetzt oder geloescht.
pub fn header_block(header: &MediaHeader, extension: Option<&ExtensionHeader>) -> ProtocolResult<Vec<u8>> {
    let mut header = *header;
    match extension {
        Some(_) => header.flags |= MediaFlags::EXTENSION,
        None => header.flags &= !MediaFlags::EXTENSION,
    }

    let ext_len = extension.map(ExtensionHeader::encoded_len).unwrap_or(0);
    let mut out = Vec::with_capacity(MediaHeader::SIZE + ext_len);
    out.extend_from_slice(&header.encode());
    if let Some(ext) = extension {
        ext.write_to(&mut out)?;
    }
    Ok(out)
}

/// Setzt ein Paket aus Header-Block, Nonce und versiegelten Voice-Daten zusammen
pub fn assemble(header_block: &[u8], nonce: FrameNonce, sealed: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(header_block.len() + NONCE_LAENGE + sealed.len());
    out.extend_from_slice(header_block);
    out.extend_from_slice(&nonce.encode());
    out.extend_from_slice(sealed);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn paket(extension: Option<&ExtensionHeader>, sealed_len: usize) -> Vec<u8> {
        let header = MediaHeader::new(PacketType::Audio, 0, 1, 960, 1234);
        let block = header_block(&header, extension).unwrap();
        assemble(&block, FrameNonce::new(3, 7), &vec![0xAB; sealed_len])
    }

    #[test]
    fn header_big_endian_byte_reihenfolge() {
        let header = MediaHeader::new(PacketType::Audio, 0x0102, 0x01020304, 0x05060708, 0x090A0B0C);
        let bytes = header.encode();
        assert_eq!(&bytes[2..4], &[0x01, 0x02]);
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[8..12], &[0x05, 0x06, 0x07, 0x08]);
        assert_eq!(&bytes[12..16], &[0x09, 0x0A, 0x0B, 0x0C]);
        assert_eq!(MediaHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn header_decode_unbekannter_packet_type() {
        let mut bytes = MediaHeader::new(PacketType::Audio, 0, 0, 0, 0).encode();
        bytes[1] = 255;
        assert!(matches!(
            MediaHeader::decode(&bytes),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn layout_ohne_extension() {
        let buf = paket(None, 40);
        let info = FrameInfo::compute(&buf).unwrap();
        assert_eq!(info.header, 0..16);
        assert_eq!(info.extension_len, 0);
        assert_eq!(info.nonce, 16..24);
        assert_eq!(info.voice_data, 24..64);
        assert_eq!(info.total_len(), buf.len());
    }

    #[test]
    fn layout_mit_extension_gehoert_zum_header() {
        let ext = ExtensionHeader::new(0xBEDE, vec![1, 2, 3, 4, 5]);
        let buf = paket(Some(&ext), TAG_LAENGE);
        let info = FrameInfo::compute(&buf).unwrap();
        // 4 Byte Praefix + 8 Byte (aufgefuellt)
        assert_eq!(info.extension_len, 12);
        assert_eq!(info.header, 0..28);
        assert_eq!(info.nonce, 28..36);

        let frame = MediaFrame::parse(&buf).unwrap();
        assert!(frame.header.hat_flag(MediaFlags::EXTENSION));
        assert_eq!(frame.extension_data(), &[1, 2, 3, 4, 5, 0, 0, 0]);
        assert_eq!(frame.associated_data().len(), 28);
        assert_eq!(frame.nonce, FrameNonce::new(3, 7));
    }

    #[test]
    fn zu_kurzer_puffer_ist_malformed() {
        assert!(FrameInfo::compute(&[PROTOKOLL_VERSION; 10]).is_err());
        // Header vorhanden, aber kein Platz fuer Nonce + Tag
        let buf = paket(None, TAG_LAENGE - 1);
        assert!(matches!(
            FrameInfo::compute(&buf),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn extension_laenge_ueber_pufferende_ist_malformed() {
        let mut buf = paket(None, TAG_LAENGE);
        buf[2..4].copy_from_slice(&MediaFlags::EXTENSION.to_be_bytes());
        // 0xFFFF Worte angekuendigt
        buf[18] = 0xFF;
        buf[19] = 0xFF;
        let fehler = FrameInfo::compute(&buf).unwrap_err();
        assert!(fehler.ist_paket_lokal());
    }

    #[test]
    fn falsche_version_ist_malformed() {
        let mut buf = paket(None, TAG_LAENGE);
        buf[0] = 9;
        assert!(FrameInfo::compute(&buf).is_err());
    }

    #[test]
    fn header_block_loescht_veraltetes_extension_flag() {
        let header = MediaHeader::new(PacketType::Audio, MediaFlags::EXTENSION, 1, 0, 1);
        let block = header_block(&header, None).unwrap();
        assert_eq!(block.len(), MediaHeader::SIZE);
        assert_eq!(u16::from_be_bytes([block[2], block[3]]) & MediaFlags::EXTENSION, 0);
    }

    proptest! {
        #[test]
        fn bereiche_partitionieren_das_paket(
            ext_daten in proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
            sealed_len in TAG_LAENGE..512usize,
        ) {
            let ext = ext_daten.map(|d| ExtensionHeader::new(0x1000, d));
            let buf = paket(ext.as_ref(), sealed_len);
            let info = FrameInfo::compute(&buf).unwrap();

            prop_assert_eq!(info.header.start, 0);
            prop_assert_eq!(info.header.end, info.nonce.start);
            prop_assert_eq!(info.nonce.end, info.voice_data.start);
            prop_assert_eq!(info.voice_data.end, buf.len());
            prop_assert_eq!(info.nonce.len(), NONCE_LAENGE);
            prop_assert!(info.voice_data.len() >= TAG_LAENGE);
        }

        #[test]
        fn beliebige_bytes_panicken_nie(buf in proptest::collection::vec(any::<u8>(), 0..128)) {
            if let Ok(info) = FrameInfo::compute(&buf) {
                prop_assert!(info.total_len() == buf.len());
            }
        }
    }
}
