use pdf_container::pdf::{Dictionary, Object, ObjectId, Stream};
use pdf_container::{
    EncryptionAlgorithm, EncryptionMode, PDFError, PDFPermissions, PDFResult, PdfReader, PdfStamper, PdfWriter,
    ReaderOptions, ReaderState, Revision,
};
use pretty_assertions::assert_eq;
use rstest::rstest;

/// Catalog, page tree, one page and its content stream
struct OnePage {
    writer: PdfWriter,
    content: ObjectId,
}

fn one_page(text: &str) -> PDFResult<OnePage> {
    let mut writer = PdfWriter::new();
    let pages = writer.allocate_object()?;
    let content = writer.add_object(Stream::from_content(format!("BT /F1 24 Tf 72 720 Td ({}) Tj ET", text)))?;

    let mut page = Dictionary::with_type("Page");
    page.set_reference("Parent", pages);
    page.set_reference("Contents", content);
    page.set(
        "MediaBox",
        vec![Object::from(0), Object::from(0), Object::from(612), Object::from(792)],
    );
    let page = writer.add_object(page)?;

    let mut tree = Dictionary::with_type("Pages");
    tree.set("Kids", vec![Object::Reference(page)]);
    tree.set("Count", 1);
    writer.set_object(pages, tree)?;

    let mut catalog = Dictionary::with_type("Catalog");
    catalog.set_reference("Pages", pages);
    let catalog = writer.add_object(catalog)?;
    writer.set_root(catalog)?;
    Ok(OnePage { writer, content })
}

fn encrypted(text: &str, mode: EncryptionMode, permissions: PDFPermissions) -> PDFResult<Vec<u8>> {
    let mut doc = one_page(text)?;
    doc.writer.set_encryption(b"user", b"owner", permissions, mode)?;
    doc.writer.save()?;
    doc.writer.into_bytes()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|window| window == needle)
}

#[test_log::test]
fn aes256_document_with_user_and_owner_passwords() -> PDFResult<()> {
    let bytes = encrypted(
        "Some test content",
        EncryptionAlgorithm::AES_256.into(),
        PDFPermissions::new(PDFPermissions::PRINT),
    )?;
    assert!(find(&bytes, b"Some test content").is_none());

    let user = PdfReader::from_bytes(bytes.clone(), b"user")?;
    assert_eq!(user.state(), ReaderState::Ready);
    assert!(user.is_encrypted());
    assert!(!user.is_opened_with_full_permissions());
    assert_eq!(user.number_of_pages()?, 1);
    assert_eq!(user.page_text(1)?, "Some test content");
    assert!(user.permissions().has_permission(PDFPermissions::PRINT));
    assert!(!user.permissions().has_permission(PDFPermissions::MODIFY));

    let owner = PdfReader::from_bytes(bytes.clone(), b"owner")?;
    assert!(owner.is_opened_with_full_permissions());
    assert_eq!(owner.page_text(1)?, "Some test content");
    assert_eq!(owner.encryption_state().map(|state| state.revision()), Some(Revision::R6));

    assert!(matches!(
        PdfReader::from_bytes(bytes.clone(), b"nobody"),
        Err(PDFError::BadPassword)
    ));

    let locked = PdfReader::inspect_bytes(bytes)?;
    assert_eq!(locked.state(), ReaderState::Locked);
    assert!(locked.page_text(1).is_err());
    assert!(locked.get_raw_object(locked.trailer().root).is_ok());
    Ok(())
}

#[rstest]
#[case(EncryptionMode::new(EncryptionAlgorithm::RC4_40))]
#[case(EncryptionMode::new(EncryptionAlgorithm::RC4_40).with_revision(Revision::R3))]
#[case(EncryptionMode::new(EncryptionAlgorithm::RC4_128))]
#[case(EncryptionMode::new(EncryptionAlgorithm::RC4_128).with_key_length(96))]
#[case(EncryptionMode::new(EncryptionAlgorithm::RC4_128).with_revision(Revision::R4))]
#[case(EncryptionMode::new(EncryptionAlgorithm::AES_128))]
#[case(EncryptionMode::new(EncryptionAlgorithm::AES_128).with_encrypt_metadata(false))]
#[case(EncryptionMode::new(EncryptionAlgorithm::AES_256).with_revision(Revision::R5))]
#[case(EncryptionMode::new(EncryptionAlgorithm::AES_256))]
fn owner_and_user_sessions_differ(#[case] mode: EncryptionMode) -> PDFResult<()> {
    let bytes = encrypted("round trip", mode, PDFPermissions::new(PDFPermissions::COPY))?;

    let user = PdfReader::from_bytes(bytes.clone(), b"user")?;
    let owner = PdfReader::from_bytes(bytes.clone(), b"owner")?;
    assert_eq!(user.page_text(1)?, "round trip");
    assert_eq!(owner.page_text(1)?, "round trip");
    assert!(!user.is_opened_with_full_permissions());
    assert!(owner.is_opened_with_full_permissions());
    assert_eq!(user.encryption_state().map(|state| state.algorithm()), Some(mode.algorithm));

    assert!(matches!(PdfReader::from_bytes(bytes, b""), Err(PDFError::BadPassword)));

    if mode.revision < Revision::R5 {
        assert_eq!(owner.compute_user_password()?, b"user".to_vec());
        assert!(user.compute_user_password().is_err());
    } else {
        assert!(owner.compute_user_password().is_err());
    }
    Ok(())
}

#[test_log::test]
fn empty_user_password_opens_without_prompt() -> PDFResult<()> {
    let mut doc = one_page("open")?;
    doc.writer
        .set_encryption(b"", b"", PDFPermissions::default(), EncryptionAlgorithm::AES_128)?;
    doc.writer.save()?;
    let bytes = doc.writer.into_bytes()?;

    let reader = PdfReader::from_bytes(bytes, b"")?;
    assert_eq!(reader.page_text(1)?, "open");
    assert!(!reader.is_opened_with_full_permissions());
    Ok(())
}

#[test_log::test]
fn xref_records_are_fixed_width() -> PDFResult<()> {
    let mut doc = one_page("records")?;
    let unused = doc.writer.allocate_object()?;
    doc.writer.save()?;
    let bytes = doc.writer.into_bytes()?;

    let start = rfind(&bytes, b"\nxref\n").map(|at| at + 6).unwrap_or_default();
    let header_end = start + find(&bytes[start..], b"\n").unwrap_or_default();
    assert_eq!(&bytes[start..header_end], format!("0 {}", unused.number + 1).as_bytes());

    let records = &bytes[header_end + 1..];
    let count = unused.number as usize + 1;
    for (number, record) in records.chunks(20).take(count).enumerate() {
        assert_eq!(record.len(), 20);
        assert!(record[..10].iter().all(u8::is_ascii_digit), "record {}", number);
        assert_eq!(record[10], b' ');
        assert!(record[11..16].iter().all(u8::is_ascii_digit));
        assert_eq!(record[16], b' ');
        assert!(record[17] == b'n' || record[17] == b'f');
        assert_eq!(&record[18..], b" \n");
    }

    // Free list: 0 -> unused -> 0
    assert_eq!(&records[..20], format!("{:010} 65535 f \n", unused.number).as_bytes());
    let last = &records[unused.number as usize * 20..][..20];
    assert_eq!(last, b"0000000000 00001 f \n");
    assert_eq!(&records[count * 20..count * 20 + 7], b"trailer");
    Ok(())
}

#[rstest]
#[case(None)]
#[case(Some(EncryptionAlgorithm::RC4_128))]
#[case(Some(EncryptionAlgorithm::AES_256))]
fn incremental_chain_keeps_latest_version(#[case] algorithm: Option<EncryptionAlgorithm>) -> PDFResult<()> {
    const UPDATES: u32 = 5;

    let mut doc = one_page("version 0")?;
    if let Some(algorithm) = algorithm {
        doc.writer
            .set_encryption(b"user", b"owner", PDFPermissions::default(), algorithm)?;
    }
    doc.writer.save()?;
    let mut bytes = doc.writer.into_bytes()?;
    let initial = PdfReader::from_bytes(bytes.clone(), b"owner")?;
    let initial_size = initial.trailer().size;
    let initial_id = initial.trailer().id.clone();

    for update in 1..=UPDATES {
        let reader = PdfReader::from_bytes(bytes.clone(), b"owner")?;
        let previous_startxref = reader.startxref();
        let previous_len = bytes.len();

        let mut stamper = PdfStamper::new(reader)?;
        stamper.set_object(
            doc.content,
            Stream::from_content(format!("BT (version {}) Tj ET", update)),
        )?;
        stamper.add_object(Object::from(update as i64))?;
        stamper.close()?;
        bytes = stamper.into_bytes()?;

        let reader = PdfReader::from_bytes(bytes.clone(), b"owner")?;
        assert!(!reader.is_rebuilt());
        assert_eq!(reader.trailer().prev, previous_startxref);
        assert!(reader.startxref().is_some_and(|offset| offset as usize > previous_len));
    }

    let reader = PdfReader::from_bytes(bytes.clone(), b"user")?;
    assert_eq!(reader.page_text(1)?, format!("version {}", UPDATES));
    assert_eq!(reader.trailer().size, initial_size + UPDATES);
    let last = ObjectId::new(initial_size + UPDATES - 1, 0);
    assert_eq!(reader.get_object(last)?, Object::Integer(UPDATES as i64));

    let [first, second] = reader.trailer().id.clone().unwrap_or_default();
    let [initial_first, initial_second] = initial_id.unwrap_or_default();
    assert_eq!(first, initial_first);
    assert_ne!(second, initial_second);
    Ok(())
}

#[test_log::test]
fn recovery_after_corrupt_startxref() -> PDFResult<()> {
    let mut bytes = encrypted("recovered", EncryptionAlgorithm::RC4_128.into(), PDFPermissions::default())?;
    let at = rfind(&bytes, b"startxref\n").map(|at| at + 10).unwrap_or_default();
    let end = at + find(&bytes[at..], b"\n").unwrap_or_default();
    bytes.splice(at..end, b"99999999".iter().copied());

    let reader = PdfReader::from_bytes(bytes, b"user")?;
    assert!(reader.is_rebuilt());
    assert_eq!(reader.state(), ReaderState::Ready);
    assert_eq!(reader.page_text(1)?, "recovered");
    Ok(())
}

#[test_log::test]
fn recovery_after_corrupt_trailer() -> PDFResult<()> {
    let mut doc = one_page("no trailer")?;
    doc.writer.save()?;
    let mut bytes = doc.writer.into_bytes()?;
    let at = rfind(&bytes, b"trailer").unwrap_or_default();
    bytes.truncate(at);
    bytes.extend_from_slice(b"trailer\n<</Size 3 /Ro");

    let reader = PdfReader::from_bytes(bytes, b"")?;
    assert!(reader.is_rebuilt());
    assert_eq!(reader.number_of_pages()?, 1);
    assert_eq!(reader.page_text(1)?, "no trailer");
    assert!(PdfStamper::new(reader).is_err());
    Ok(())
}

#[test_log::test]
fn recovery_after_shifted_offsets() -> PDFResult<()> {
    let mut doc = one_page("shifted")?;
    doc.writer.save()?;
    let mut bytes = doc.writer.into_bytes()?;
    let header_end = find(&bytes, b"\n").map(|at| at + 1).unwrap_or_default();
    bytes.splice(header_end..header_end, b"% inserted comment line\n".iter().copied());

    let reader = PdfReader::from_bytes(bytes, b"")?;
    assert!(reader.is_rebuilt());
    assert_eq!(reader.page_text(1)?, "shifted");
    Ok(())
}

#[test_log::test]
fn recovery_after_one_bad_record() -> PDFResult<()> {
    let mut doc = one_page("one bad record")?;
    doc.writer.save()?;
    let content = doc.content;
    let mut bytes = doc.writer.into_bytes()?;

    let table = rfind(&bytes, b"\nxref\n").map(|at| at + 6).unwrap_or_default();
    let records = table + find(&bytes[table..], b"\n").map(|at| at + 1).unwrap_or_default();
    let record = records + content.number as usize * 20;
    let offset: u64 = std::str::from_utf8(&bytes[record..record + 10])
        .ok()
        .and_then(|digits| digits.parse().ok())
        .unwrap_or_default();
    assert!(offset > 0);
    bytes.splice(record..record + 10, format!("{:010}", offset + 3).into_bytes());

    let reader = PdfReader::from_bytes(bytes, b"")?;
    assert!(reader.is_rebuilt());
    assert_eq!(reader.xref().get(content.number).map(|entry| entry.offset), Some(offset));
    assert_eq!(reader.page_text(1)?, "one bad record");
    Ok(())
}

#[test_log::test]
fn chunked_file_reads() -> PDFResult<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("chunked.pdf");

    let mut doc = one_page("across chunk boundaries")?;
    doc.writer
        .set_encryption(b"user", b"owner", PDFPermissions::default(), EncryptionAlgorithm::AES_128)?;
    let written = doc.writer.save_to(&path)?;
    assert_eq!(std::fs::metadata(&path)?.len(), written);

    let options = ReaderOptions {
        chunk_size: 7,
        ..ReaderOptions::default()
    };
    let reader = PdfReader::open_with_options(&path, b"user", &options)?;
    assert!(!reader.is_rebuilt());
    assert_eq!(reader.file_length(), written);
    assert_eq!(reader.page_text(1)?, "across chunk boundaries");

    let update_path = dir.path().join("updated.pdf");
    let mut stamper = PdfStamper::new(PdfReader::open_with_options(&path, b"owner", &options)?)?;
    stamper.set_object(ObjectId::new(2, 0), Stream::from_content("BT (updated) Tj ET"))?;
    stamper.save_to(&update_path)?;
    assert_eq!(PdfReader::open(&update_path, b"user")?.page_text(1)?, "updated");
    Ok(())
}

#[test_log::test]
fn writer_output_feeds_stamper_numbers() -> PDFResult<()> {
    let mut doc = one_page("shared numbers")?;
    doc.writer.save()?;
    let mut stamper = doc.writer.into_stamper(b"")?;
    let added = stamper.add_object(Object::Boolean(true))?;
    assert_eq!(added, ObjectId::new(5, 0));
    stamper.close()?;

    let reader = PdfReader::from_bytes(stamper.into_bytes()?, b"")?;
    assert_eq!(reader.get_object(added)?, Object::Boolean(true));
    assert_eq!(reader.get_object(ObjectId::new(99, 0))?, Object::Null);
    Ok(())
}
