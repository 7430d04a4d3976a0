//! Phonetic respelling of Latin words in Cyrillic, for Russian TTS voices.
//!
//! Each run of ASCII letters is lowercased and converted digraph first
//! (`sh`, `ch`, ...), then letter by letter. Everything else is kept as is.

fn digraph(pair: &str) -> Option<&'static str> {
    Some(match pair {
        "sh" => "ш",
        "ch" => "ч",
        "th" => "с",
        "zh" => "ж",
        "ph" => "ф",
        "wh" => "в",
        "ck" => "к",
        "ng" => "нг",
        "qu" => "кв",
        "ew" => "ю",
        _ => return None,
    })
}

fn letter(c: u8) -> &'static str {
    match c {
        b'a' => "а",
        b'b' => "б",
        b'c' => "си",
        b'd' => "д",
        b'e' => "е",
        b'f' => "ф",
        b'g' => "г",
        b'h' => "х",
        b'i' => "и",
        b'j' => "дж",
        b'k' => "к",
        b'l' => "л",
        b'm' => "м",
        b'n' => "н",
        b'o' => "о",
        b'p' => "п",
        b'q' => "к",
        b'r' => "р",
        b's' => "с",
        b't' => "т",
        b'u' => "у",
        b'v' => "в",
        b'w' => "в",
        b'x' => "кс",
        b'y' => "й",
        b'z' => "з",
        _ => "",
    }
}

fn transliterate_word(word: &str, out: &mut String) {
    let word = word.to_ascii_lowercase();
    let bytes = word.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if let Some(cyr) = word.get(i..i + 2).and_then(digraph) {
            out.push_str(cyr);
            i += 2;
            continue;
        }
        out.push_str(letter(bytes[i]));
        i += 1;
    }
}

/// Respells every Latin word of `text` in Cyrillic
pub fn transliterate(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    let mut word_start = None;

    for (i, c) in text.char_indices() {
        if c.is_ascii_alphabetic() {
            word_start.get_or_insert(i);
            continue;
        }
        if let Some(start) = word_start.take() {
            transliterate_word(&text[start..i], &mut out);
        }
        out.push(c);
    }
    if let Some(start) = word_start {
        transliterate_word(&text[start..], &mut out);
    }

    out
}
