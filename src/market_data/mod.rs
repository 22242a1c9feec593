// Market data module entrypoint
pub mod adapters;       // venue-specific transports (Bitvavo primary, Binance fallback)
pub mod normaliser;     // wire values -> price keys / validated levels
pub mod external_book;  // in-memory mirror of the venue book
pub mod tick;           // top-of-book tick handed to consumers
pub mod synchronizer;   // snapshot + sequenced diffs, gap detection
pub mod retry;          // retry delays and clock seams
pub mod supervisor;     // transport lifecycle, failover, resync
