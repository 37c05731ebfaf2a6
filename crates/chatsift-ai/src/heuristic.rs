//! Regex heuristics for phones, emails, prices, dates, and street addresses.
//!
//! Deterministic and offline: useful as the auxiliary extractor when no model
//! endpoint is configured.

use chatsift_core::ExtractedFields;
use chrono::NaiveDate;
use regex::Regex;

use crate::auxiliary::{AuxiliaryError, AuxiliaryExtractor};

/// Genitive Russian month names as written in dates ("16 мая 2008").
const MONTHS_RU: &[&str] = &[
    "января",
    "февраля",
    "марта",
    "апреля",
    "мая",
    "июня",
    "июля",
    "августа",
    "сентября",
    "октября",
    "ноября",
    "декабря",
];

/// Pattern-based extractor.
///
/// - `phone`: `[+]CC (DDD) DDD-DD-DD` shapes not touching other digits, separators
///   stripped; dates are blanked out first
/// - `email`: first address-like token
/// - `price`: amount followed by ₽ / руб / $ / €, or preceded by $ / €
/// - `date`: `DD.MM.YYYY`, `YYYY-MM-DD`, `DD/MM/YYYY`, `D <месяц> YYYY`, normalised to `YYYY-MM-DD`
/// - `address`: text following a street marker (ул., улица, пр., проспект, пер., переулок)
pub struct HeuristicExtractor {
    phone: Regex,
    email: Regex,
    price: Regex,
    date: Regex,
    address: Regex,
}

impl HeuristicExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            phone: Regex::new(
                r"(?:^|\D)(?P<phone>(?:\+?\d{1,3}[ \-]?)?\(?\d{3}\)?[ \-]?\d{3}[ \-]?\d{2}[ \-]?\d{2})(?:\D|$)",
            )?,
            email: Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}")?,
            price: Regex::new(
                r"(?i)(?:\d[\d ]*(?:[.,]\d{1,2})?\s?(?:₽|руб(?:лей|ля|ль)?\.?|\$|€)|[$€]\s?\d[\d ]*(?:[.,]\d{1,2})?)",
            )?,
            date: Regex::new(&format!(
                r"(?i)\b(?:(?P<d1>\d{{1,2}})\.(?P<m1>\d{{1,2}})\.(?P<y1>\d{{4}})|(?P<y2>\d{{4}})-(?P<m2>\d{{2}})-(?P<d2>\d{{2}})|(?P<d3>\d{{1,2}})/(?P<m3>\d{{1,2}})/(?P<y3>\d{{4}})|(?P<d4>\d{{1,2}})\s+(?P<m4>{})\s+(?P<y4>\d{{4}}))",
                MONTHS_RU.join("|")
            ))?,
            address: Regex::new(
                r"(?i)(?:^|[^А-Яа-яЁёA-Za-z])(?P<address>(?:ул\.|улица|пр\.|проспект|пер\.|переулок)[ \t]*[А-Яа-яЁё\d \t\.,\-/]+)",
            )?,
        })
    }

    fn find_phone(&self, text: &str) -> Option<String> {
        let text = self.date.replace_all(text, " ");
        let m = self.phone.captures(&text)?.name("phone")?;
        Some(m.as_str().chars().filter(char::is_ascii_digit).collect())
    }

    fn find_date(&self, text: &str) -> Option<String> {
        self.date.captures_iter(text).find_map(|caps| {
            let num = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u32>().ok());
            let year = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<i32>().ok());
            let date = if caps.name("y1").is_some() {
                NaiveDate::from_ymd_opt(year("y1")?, num("m1")?, num("d1")?)
            } else if caps.name("y2").is_some() {
                NaiveDate::from_ymd_opt(year("y2")?, num("m2")?, num("d2")?)
            } else if caps.name("y3").is_some() {
                NaiveDate::from_ymd_opt(year("y3")?, num("m3")?, num("d3")?)
            } else {
                let month = month_number(caps.name("m4")?.as_str())?;
                NaiveDate::from_ymd_opt(year("y4")?, month, num("d4")?)
            };
            date.map(|d| d.format("%Y-%m-%d").to_string())
        })
    }

    fn find_address(&self, text: &str) -> Option<String> {
        let m = self.address.captures(text)?.name("address")?;
        let value = m
            .as_str()
            .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | '-'));
        (!value.is_empty()).then(|| value.to_string())
    }
}

impl AuxiliaryExtractor for HeuristicExtractor {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn extract(&self, raw_text: &str) -> Result<ExtractedFields, AuxiliaryError> {
        let mut fields = ExtractedFields::new();
        if let Some(date) = self.find_date(raw_text) {
            fields.set("date", &date);
        }
        if let Some(address) = self.find_address(raw_text) {
            fields.set("address", &address);
        }
        if let Some(phone) = self.find_phone(raw_text) {
            fields.set("phone", &phone);
        }
        if let Some(m) = self.email.find(raw_text) {
            fields.set("email", m.as_str());
        }
        if let Some(m) = self.price.find(raw_text) {
            fields.set("price", m.as_str());
        }
        Ok(fields)
    }
}

/// Normalise a standalone date string to `YYYY-MM-DD`.
///
/// Accepts `DD.MM.YYYY`, `YYYY-MM-DD`, `DD/MM/YYYY` and `D <месяц> YYYY`.
pub fn normalize_date(s: &str) -> Option<String> {
    let s = s.trim();
    for fmt in ["%d.%m.%Y", "%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    let mut parts = s.split_whitespace();
    let day: u32 = parts.next()?.parse().ok()?;
    let month = month_number(parts.next()?)?;
    let year: i32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.format("%Y-%m-%d").to_string())
}

fn month_number(name: &str) -> Option<u32> {
    let name = name.to_lowercase();
    MONTHS_RU
        .iter()
        .position(|m| *m == name)
        .map(|i| i as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> HeuristicExtractor {
        HeuristicExtractor::new().unwrap()
    }

    #[test]
    fn extracts_phone_digits() {
        let fields = extractor()
            .extract("Телефон: +7 (999) 123-45-67")
            .unwrap();
        assert_eq!(fields.get("phone"), Some("79991234567"));
    }

    #[test]
    fn short_digit_runs_are_not_phones() {
        let fields = extractor().extract("Встреча 2023-12-25").unwrap();
        assert!(fields.get("phone").is_none());
        assert_eq!(fields.get("date"), Some("2023-12-25"));
    }

    #[test]
    fn date_followed_by_numbers_is_not_a_phone() {
        let fields = extractor().extract("Встреча 2024-05-16 10 30").unwrap();
        assert_eq!(fields.get("date"), Some("2024-05-16"));
        assert!(fields.get("phone").is_none());

        let fields = extractor().extract("16.05.2024 в 10 30, кабинет 12").unwrap();
        assert!(fields.get("phone").is_none());
    }

    #[test]
    fn long_number_runs_are_not_phones() {
        let fields = extractor().extract("Заказ 1234567890123456").unwrap();
        assert!(fields.get("phone").is_none());
    }

    #[test]
    fn street_marker_inside_word_is_not_an_address() {
        let fields = extractor().extract("Спросите напр. завтра утром").unwrap();
        assert!(fields.get("address").is_none());

        let fields = extractor().extract("Адрес:ул. Мира 3").unwrap();
        assert_eq!(fields.get("address"), Some("ул. Мира 3"));
    }

    #[test]
    fn extracts_russian_month_date() {
        let fields = extractor()
            .extract("16 мая 2008 года по адресу ул. Ленина, д. 10, кв. 5")
            .unwrap();
        assert_eq!(fields.get("date"), Some("2008-05-16"));
        assert_eq!(fields.get("address"), Some("ул. Ленина, д. 10, кв. 5"));
    }

    #[test]
    fn extracts_slash_date() {
        let fields = extractor()
            .extract("Номер телефона: 8-999-123-45-67, дата: 16/05/2008")
            .unwrap();
        assert_eq!(fields.get("date"), Some("2008-05-16"));
        assert_eq!(fields.get("phone"), Some("89991234567"));
    }

    #[test]
    fn invalid_calendar_date_skipped() {
        let fields = extractor().extract("31.02.2024").unwrap();
        assert!(fields.get("date").is_none());
    }

    #[test]
    fn extracts_email_and_price() {
        let fields = extractor()
            .extract("Пишите на anna.k@example.ru, цена 1 500 ₽")
            .unwrap();
        assert_eq!(fields.get("email"), Some("anna.k@example.ru"));
        assert_eq!(fields.get("price"), Some("1 500 ₽"));
    }

    #[test]
    fn plain_text_yields_nothing() {
        assert!(extractor().extract("просто текст").unwrap().is_empty());
    }

    #[test]
    fn normalize_date_formats() {
        assert_eq!(normalize_date("16.05.2008").as_deref(), Some("2008-05-16"));
        assert_eq!(normalize_date("2008-05-16").as_deref(), Some("2008-05-16"));
        assert_eq!(normalize_date("16/05/2008").as_deref(), Some("2008-05-16"));
        assert_eq!(normalize_date("16 мая 2008").as_deref(), Some("2008-05-16"));
        assert_eq!(normalize_date("16 Мая 2008").as_deref(), Some("2008-05-16"));
        assert_eq!(normalize_date("вчера"), None);
    }
}
