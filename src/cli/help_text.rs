pub(super) const ROOT_LONG_ABOUT: &str = "\
File integrity monitor for production deployments

Kekkai records a cryptographic fingerprint of every file in a deployed tree
at release time (a manifest) and later re-checks that tree against the
manifest to detect tampering: OS-command injection dropping files,
unauthorized writes, or symlink manipulation. Manifests are meant to be
stored out-of-band (object storage with write-once-at-deploy semantics) so
a compromise of the application host cannot rewrite them.

CORE CONCEPTS:

  Manifest:
    A JSON document with one SHA-256 record per file and symlink, sorted by
    path. Symlinks are fingerprinted by their target path, never followed,
    so a link and a regular file with identical bytes always verify
    differently.

  Exclude patterns:
    Glob patterns applied at generation time and frozen into the manifest.
    Verification always uses the manifest's own list; a caller cannot widen
    or narrow it afterwards.

  Metadata cache:
    An optional local cache of (size, mtime, ctime) per file that lets
    verification skip re-reading unchanged files. A configurable fraction
    of cache hits is re-hashed anyway to bound the window for metadata
    forgery. The cache file carries its own checksum and is discarded when
    it fails to verify.

TYPICAL WORKFLOW:

  1. At deploy time, generate and ship the manifest:
     $ kekkai generate --target /var/www/app --output manifest.json

  2. Periodically verify the deployment:
     $ kekkai verify --manifest manifest.json --target /var/www/app

  3. For frequent checks on large trees, enable the cache:
     $ kekkai verify --manifest manifest.json --target /var/www/app \\
         --use-cache --base-path production --app-name web

EXIT CODES:

  0    verification passed / manifest generated
  1    integrity findings were reported
  255  any other error (bad arguments, I/O failure, cancellation)
";

pub(super) const GENERATE_LONG_ABOUT: &str = "\
Generate a manifest of file hashes

Walks the target directory (resolving a top-level symlink such as
current -> releases/20240101 once), fingerprints every regular file and
symlink in parallel, and writes the sorted manifest as JSON.

Exclude patterns use forward-slash relative paths: `*` and `?` match within
one path component, `**` spans components (`cache/**`, `**/*.log`).
Patterns are frozen into the manifest and reused verbatim at verification.

EXAMPLES:

  Generate for the current directory to stdout:
    $ kekkai generate

  Generate with excludes to a file:
    $ kekkai generate --target /var/www/app \\
        --exclude '*.log' --exclude 'cache/**' \\
        --output manifest.json

  Generate into a manifest store:
    $ kekkai generate --target /var/www/app \\
        --store-dir /mnt/manifests --base-path production --app-name web
";

pub(super) const VERIFY_LONG_ABOUT: &str = "\
Verify files against a manifest

Recomputes the target tree using the manifest's exclude list and reports
every difference: modified (type change, content hash, or size), deleted,
and added entries. A type change between file and symlink is reported in
preference to a hash difference because it exposes symlink spoofing.

With --use-cache, files whose size, mtime, and ctime match the cache from
the previous successful verification skip re-hashing; --verify-probability
controls the fraction of such hits that are re-hashed anyway. The cache is
only updated after a fully clean run.

EXAMPLES:

  Verify from a local manifest:
    $ kekkai verify --manifest manifest.json --target /var/www/app

  Verify from a manifest store:
    $ kekkai verify --store-dir /mnt/manifests \\
        --base-path production --app-name web --target /var/www/app

  Cached verification for a cron job, JSON output:
    $ kekkai verify --manifest manifest.json --target /var/www/app \\
        --use-cache --base-path production --app-name web --format json
";
