//! Static markup the portal serves. The router treats these as opaque
//! bytes; nothing here affects routing.

pub const LOGIN_PAGE: &str = include_str!("../assets/login.html");
pub const DENIED_PAGE: &str = include_str!("../assets/denied.html");

/// Body for connectivity-probe answers. Probes that read the body
/// instead of following the Location header still get redirected by the
/// meta refresh or the script.
pub fn probe_redirect_page(portal_root: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head>\
         <meta http-equiv='refresh' content='0; url={portal_root}'>\
         <script>window.location.href='{portal_root}';</script>\
         </head><body>\
         <p>Redirecting to the sign-in page...</p>\
         <a href='{portal_root}'>Click here if you are not redirected automatically</a>\
         </body></html>"
    )
}

/// Body for requests that leaked through with a foreign host. The
/// delayed script gives slow engines a chance to paint before leaving.
pub fn external_redirect_page(portal_root: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head>\
         <meta http-equiv='refresh' content='0; url={portal_root}'>\
         <script>setTimeout(function(){{window.location.href='{portal_root}';}}, 100);</script>\
         </head><body>\
         <h2>Redirecting...</h2>\
         <p>You are being taken to the network sign-in page.</p>\
         <p><a href='{portal_root}'>Click here if you are not redirected</a></p>\
         </body></html>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_page_posts_to_login_route() {
        assert!(LOGIN_PAGE.contains("action=\"/login\""));
        assert!(LOGIN_PAGE.contains("name=\"username\""));
        assert!(LOGIN_PAGE.contains("name=\"password\""));
    }

    #[test]
    fn denied_page_reports_invalid_credentials() {
        assert!(DENIED_PAGE.contains("Invalid credentials"));
        assert!(DENIED_PAGE.contains("href=\"/\""));
    }

    #[test]
    fn probe_body_redirects_by_refresh_and_script() {
        let body = probe_redirect_page("http://10.42.0.1/");
        assert!(body.contains("http-equiv='refresh'"));
        assert!(body.contains("url=http://10.42.0.1/"));
        assert!(body.contains("window.location.href='http://10.42.0.1/'"));
    }

    #[test]
    fn external_body_redirects_by_refresh_and_script() {
        let body = external_redirect_page("http://10.42.0.1/");
        assert!(body.contains("http-equiv='refresh'"));
        assert!(body.contains("setTimeout"));
        assert!(body.contains("http://10.42.0.1/"));
    }
}
