use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Static metadata describing one [`Currency`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrencyMeta {
    pub code: &'static str,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub fiat: bool,
    /// Minimum order size on the reference venue, in this currency.
    /// Zero when unknown.
    pub min_amount: f64,
}

/// Process-wide currency identity. Compared by identity, never by name.
///
/// `Currency::None` is the sentinel used as the final currency of a
/// withdrawal.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    None,
    Bch,
    Btc,
    Cad,
    Dash,
    Doge,
    Eos,
    Etc,
    Eth,
    Eur,
    Gbp,
    Gno,
    Ltc,
    Mln,
    Rep,
    Usd,
    Usdt,
    Xlm,
    Xmr,
    Xrp,
    Zec,
}

impl Currency {
    pub const ALL: &'static [Currency] = &[
        Currency::None,
        Currency::Bch,
        Currency::Btc,
        Currency::Cad,
        Currency::Dash,
        Currency::Doge,
        Currency::Eos,
        Currency::Etc,
        Currency::Eth,
        Currency::Eur,
        Currency::Gbp,
        Currency::Gno,
        Currency::Ltc,
        Currency::Mln,
        Currency::Rep,
        Currency::Usd,
        Currency::Usdt,
        Currency::Xlm,
        Currency::Xmr,
        Currency::Xrp,
        Currency::Zec,
    ];

    pub fn meta(&self) -> &'static CurrencyMeta {
        match self {
            Currency::None => &CurrencyMeta {
                code: "-",
                name: "None",
                aliases: &[],
                fiat: false,
                min_amount: 0.0,
            },
            Currency::Bch => &CurrencyMeta {
                code: "BCH",
                name: "Bitcoin Cash",
                aliases: &["bch"],
                fiat: false,
                min_amount: 0.002,
            },
            Currency::Btc => &CurrencyMeta {
                code: "BTC",
                name: "Bitcoin",
                aliases: &["btc", "xbt"],
                fiat: false,
                min_amount: 0.002,
            },
            Currency::Cad => &CurrencyMeta {
                code: "CAD",
                name: "Canadian Dollar",
                aliases: &["cad"],
                fiat: true,
                min_amount: 1.0,
            },
            Currency::Dash => &CurrencyMeta {
                code: "DASH",
                name: "Dash",
                aliases: &["dash"],
                fiat: false,
                min_amount: 0.03,
            },
            Currency::Doge => &CurrencyMeta {
                code: "DOGE",
                name: "Dogecoin",
                aliases: &["xdg"],
                fiat: false,
                min_amount: 3000.0,
            },
            Currency::Eos => &CurrencyMeta {
                code: "EOS",
                name: "EOS",
                aliases: &["eos"],
                fiat: false,
                min_amount: 3.0,
            },
            Currency::Etc => &CurrencyMeta {
                code: "ETC",
                name: "Ethereum Classic",
                aliases: &["etc"],
                fiat: false,
                min_amount: 0.3,
            },
            Currency::Eth => &CurrencyMeta {
                code: "ETH",
                name: "Ethereum",
                aliases: &["eth"],
                fiat: false,
                min_amount: 0.02,
            },
            Currency::Eur => &CurrencyMeta {
                code: "EUR",
                name: "Euro",
                aliases: &["eur"],
                fiat: true,
                min_amount: 1.0,
            },
            Currency::Gbp => &CurrencyMeta {
                code: "GBP",
                name: "British Pound",
                aliases: &["gbp"],
                fiat: true,
                min_amount: 0.0,
            },
            Currency::Gno => &CurrencyMeta {
                code: "GNO",
                name: "Gnosis",
                aliases: &["gno"],
                fiat: false,
                min_amount: 0.03,
            },
            Currency::Ltc => &CurrencyMeta {
                code: "LTC",
                name: "Litecoin",
                aliases: &["ltc"],
                fiat: false,
                min_amount: 0.1,
            },
            Currency::Mln => &CurrencyMeta {
                code: "MLN",
                name: "Melon",
                aliases: &["mln"],
                fiat: false,
                min_amount: 0.1,
            },
            Currency::Rep => &CurrencyMeta {
                code: "REP",
                name: "Augur",
                aliases: &["rep"],
                fiat: false,
                min_amount: 0.3,
            },
            Currency::Usd => &CurrencyMeta {
                code: "USD",
                name: "US Dollar",
                aliases: &["usd"],
                fiat: true,
                min_amount: 1.0,
            },
            Currency::Usdt => &CurrencyMeta {
                code: "USDT",
                name: "Tether",
                aliases: &["usdt"],
                fiat: false,
                min_amount: 5.0,
            },
            Currency::Xlm => &CurrencyMeta {
                code: "XLM",
                name: "Stellar Lumens",
                aliases: &["xlm"],
                fiat: false,
                min_amount: 300.0,
            },
            Currency::Xmr => &CurrencyMeta {
                code: "XMR",
                name: "Monero",
                aliases: &["xmr"],
                fiat: false,
                min_amount: 0.1,
            },
            Currency::Xrp => &CurrencyMeta {
                code: "XRP",
                name: "Ripple",
                aliases: &["xrp"],
                fiat: false,
                min_amount: 30.0,
            },
            Currency::Zec => &CurrencyMeta {
                code: "ZEC",
                name: "Zcash",
                aliases: &["zec"],
                fiat: false,
                min_amount: 0.03,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        self.meta().code
    }

    pub fn is_fiat(&self) -> bool {
        self.meta().fiat
    }

    pub fn min_amount(&self) -> f64 {
        self.meta().min_amount
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Currency::None)
    }

    /// Identify a currency from a code or alias, case-insensitive.
    pub fn discover(symbol: &str) -> Option<Currency> {
        Currency::ALL
            .iter()
            .filter(|currency| !currency.is_none())
            .find(|currency| {
                currency.code().eq_ignore_ascii_case(symbol)
                    || currency
                        .meta()
                        .aliases
                        .iter()
                        .any(|alias| alias.eq_ignore_ascii_case(symbol))
            })
            .copied()
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Split a ticker into its two currencies at a fixed symbol length.
///
/// eg/ `ticker_to_currency("usdeur", 3)` -> `(USD, EUR)`
pub fn ticker_to_currency(ticker: &str, symbol_length: usize) -> Option<(Currency, Currency)> {
    if ticker.len() <= symbol_length {
        return None;
    }
    let (first, second) = ticker.split_at(symbol_length);
    Some((Currency::discover(first)?, Currency::discover(second)?))
}

/// Split a ticker into its two currencies at a delimiter.
///
/// eg/ `ticker_to_currency_delimited("XMR/EUR", '/')` -> `(XMR, EUR)`
pub fn ticker_to_currency_delimited(ticker: &str, delimiter: char) -> Option<(Currency, Currency)> {
    let (first, second) = ticker.split_once(delimiter)?;
    Some((Currency::discover(first)?, Currency::discover(second)?))
}
