//! Text format reader.
//!
//! Hand-written recursive descent over the source text. Branch labels are
//! resolved once the whole body has been read, so forward jumps need no
//! special syntax.

use hashbrown::HashMap;

use super::*;
use crate::core::error::{ParseError, ParseResult};

pub fn parse_module(text: &str) -> ParseResult<Module> {
    let parser = Parser::new(text);
    parser.parse()
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

enum Parsed<'a> {
    Op(Opcode),
    Branch(&'a str, &'a str),
}

struct RawRegion<'a> {
    kind: RegionKind,
    try_start: &'a str,
    try_end: &'a str,
    handler_start: &'a str,
    handler_end: &'a str,
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '.' || ch == '$'
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn parse(mut self) -> ParseResult<Module> {
        let mut module = Module::new();
        self.skip_whitespace();
        while !self.is_eof() {
            let ty = self.parse_type()?;
            module.types.push(ty);
            self.skip_whitespace();
        }
        Ok(module)
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch == ';' {
                // Skip comment line
                while let Some(ch) = self.current_char() {
                    self.advance();
                    if ch == '\n' {
                        break;
                    }
                }
            } else if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> ParseResult<T> {
        let consumed = &self.text[..self.pos.min(self.text.len())];
        let line = consumed.matches('\n').count() + 1;
        let column = consumed.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
        Err(ParseError::Syntax {
            line,
            column,
            message: message.into(),
        })
    }

    fn try_read(&mut self, ch: char) -> bool {
        self.skip_whitespace();
        if self.current_char() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> ParseResult<()> {
        if !self.try_read(ch) {
            return self.error(format!(
                "Expected '{}' but found {:?}",
                ch,
                self.current_char()
            ));
        }
        Ok(())
    }

    fn expect_str(&mut self, s: &str) -> ParseResult<()> {
        self.skip_whitespace();
        if self.rest().starts_with(s) {
            self.pos += s.len();
            Ok(())
        } else {
            self.error(format!("Expected '{}'", s))
        }
    }

    fn peek_word(&mut self) -> &'a str {
        self.skip_whitespace();
        let rest = self.rest();
        let end = rest
            .char_indices()
            .find(|&(_, ch)| !is_word_char(ch))
            .map_or(rest.len(), |(i, _)| i);
        &rest[..end]
    }

    fn try_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_word() == keyword {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> ParseResult<()> {
        if !self.try_keyword(keyword) {
            let found = self.peek_word();
            return self.error(format!("Expected '{}' but found '{}'", keyword, found));
        }
        Ok(())
    }

    fn read_word(&mut self) -> ParseResult<&'a str> {
        let word = self.peek_word();
        if word.is_empty() {
            return self.error(format!("Expected a word but found {:?}", self.current_char()));
        }
        self.pos += word.len();
        Ok(word)
    }

    fn read_identifier(&mut self) -> ParseResult<&'a str> {
        self.skip_whitespace();
        let start = self.pos;

        match self.current_char() {
            Some(ch) if ch.is_alphabetic() || ch == '_' || ch == '$' => {}
            Some(ch) => return self.error(format!("Expected identifier but found '{}'", ch)),
            None => return self.error("Expected identifier but found EOF"),
        }

        while let Some(ch) = self.current_char() {
            if is_ident_char(ch) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(&self.text[start..self.pos])
    }

    fn read_string(&mut self) -> ParseResult<String> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.current_char() {
                None => return self.error("Unterminated string literal"),
                Some('"') => {
                    self.advance();
                    return Ok(out);
                }
                Some('\\') => {
                    self.advance();
                    let escaped = match self.current_char() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('"') => '"',
                        Some('\\') => '\\',
                        other => return self.error(format!("Unknown escape {:?}", other)),
                    };
                    out.push(escaped);
                    self.advance();
                }
                Some(ch) => {
                    out.push(ch);
                    self.advance();
                }
            }
        }
    }

    /// Raw numeric token including sign, suffix and exponent.
    fn read_number_token(&mut self) -> ParseResult<&'a str> {
        self.skip_whitespace();
        let start = self.pos;
        if matches!(self.current_char(), Some('-') | Some('+')) {
            self.advance();
        }
        let mut prev = ' ';
        while let Some(ch) = self.current_char() {
            let exponent_sign = (ch == '-' || ch == '+') && (prev == 'e' || prev == 'E');
            if ch.is_ascii_alphanumeric() || ch == '.' || exponent_sign {
                prev = ch;
                self.advance();
            } else {
                break;
            }
        }
        let token = &self.text[start..self.pos];
        if !token.chars().any(|c| c.is_ascii_digit()) {
            return self.error(format!("Expected a number but found '{}'", token));
        }
        Ok(token)
    }

    fn parse_number<T: std::str::FromStr>(&mut self) -> ParseResult<T> {
        let token = self.read_number_token()?;
        let digits = token.trim_end_matches(['f', 'F']);
        match digits.parse::<T>() {
            Ok(v) => Ok(v),
            Err(_) => self.error(format!("Invalid number '{}'", token)),
        }
    }

    fn parse_literal(&mut self) -> ParseResult<Literal> {
        self.skip_whitespace();
        if self.current_char() == Some('"') {
            return Ok(Literal::Str(self.read_string()?));
        }
        if self.try_keyword("true") {
            return Ok(Literal::Bool(true));
        }
        if self.try_keyword("false") {
            return Ok(Literal::Bool(false));
        }
        let token = self.read_number_token()?;
        let parsed = if let Some(d) = token.strip_suffix("UL").or_else(|| token.strip_suffix("ul")) {
            d.parse().map(Literal::ULong).ok()
        } else if let Some(d) = token.strip_suffix(['L', 'l']) {
            d.parse().map(Literal::Long).ok()
        } else if let Some(d) = token.strip_suffix(['f', 'F']) {
            d.parse().map(Literal::Float).ok()
        } else if token.contains(['.', 'e', 'E']) {
            token.parse().map(Literal::Double).ok()
        } else {
            token.parse().map(Literal::Int).ok()
        };
        match parsed {
            Some(literal) => Ok(literal),
            None => self.error(format!("Invalid literal '{}'", token)),
        }
    }

    fn parse_type_ref(&mut self) -> ParseResult<TypeRef> {
        let name = self.read_identifier()?;
        let mut args = Vec::new();
        if self.try_read('<') {
            loop {
                args.push(self.parse_type_ref()?);
                if !self.try_read(',') {
                    break;
                }
            }
            self.expect('>')?;
        }
        Ok(TypeRef::generic(name, args))
    }

    fn parse_type(&mut self) -> ParseResult<TypeDef> {
        let kind = match self.read_word()? {
            "class" => TypeKind::Class,
            "struct" => TypeKind::Struct,
            "interface" => TypeKind::Interface,
            other => {
                return self.error(format!(
                    "Expected 'class', 'struct' or 'interface' but found '{}'",
                    other
                ))
            }
        };
        let name = self.read_identifier()?;
        let mut ty = TypeDef::new(name, kind);

        if self.try_read(':') {
            ty.base = Some(self.parse_type_ref()?);
        }
        if self.try_keyword("impl") {
            loop {
                ty.interfaces.push(self.parse_type_ref()?);
                if !self.try_read(',') {
                    break;
                }
            }
        }

        self.expect('{')?;
        while !self.try_read('}') {
            if self.is_eof() {
                return self.error(format!("Unterminated type '{}'", ty.name));
            }
            self.parse_member(&mut ty)?;
        }
        Ok(ty)
    }

    fn parse_member(&mut self, ty: &mut TypeDef) -> ParseResult<()> {
        match self.peek_word() {
            "class" | "struct" | "interface" => {
                let nested = self.parse_type()?;
                ty.nested.push(nested);
            }
            "field" => {
                self.pos += "field".len();
                let field = self.parse_field(false)?;
                ty.fields.push(field);
            }
            "ctor" => {
                self.pos += "ctor".len();
                ty.ctor = self.parse_ctor()?;
            }
            "static" => {
                let save = self.pos;
                self.pos += "static".len();
                if self.try_keyword("field") {
                    let field = self.parse_field(true)?;
                    ty.fields.push(field);
                } else {
                    self.pos = save;
                    let method = self.parse_method()?;
                    ty.methods.push(method);
                }
            }
            _ => {
                let method = self.parse_method()?;
                ty.methods.push(method);
            }
        }
        Ok(())
    }

    fn parse_field(&mut self, is_static: bool) -> ParseResult<FieldDef> {
        let ty = self.parse_type_ref()?;
        let name = self.read_identifier()?;
        Ok(FieldDef {
            name: name.to_string(),
            ty,
            is_static,
        })
    }

    fn parse_ctor(&mut self) -> ParseResult<Vec<CtorParam>> {
        let mut params = Vec::new();
        self.expect('(')?;
        if self.try_read(')') {
            return Ok(params);
        }
        loop {
            let bound = self.try_keyword("bind");
            let alias = if bound && self.try_read('(') {
                self.skip_whitespace();
                let alias = self.read_string()?;
                self.expect(')')?;
                Some(alias)
            } else {
                None
            };
            let ty = self.parse_type_ref()?;
            let name = self.read_identifier()?;
            params.push(CtorParam {
                name: name.to_string(),
                ty,
                bound,
                alias,
            });
            if !self.try_read(',') {
                break;
            }
        }
        self.expect(')')?;
        Ok(params)
    }

    fn parse_marker(&mut self) -> ParseResult<MarkerApplication> {
        self.expect('@')?;
        let marker = self.parse_type_ref()?;
        let mut app = MarkerApplication {
            marker,
            args: Vec::new(),
            properties: Vec::new(),
        };
        if self.try_read('(') {
            if self.try_read(')') {
                return Ok(app);
            }
            loop {
                let save = self.pos;
                let named = match self.read_identifier() {
                    Ok(name) if name != "true" && name != "false" && self.try_read('=') => Some(name),
                    _ => None,
                };
                match named {
                    Some(name) => {
                        let value = self.parse_literal()?;
                        app.properties.push((name.to_string(), value));
                    }
                    None => {
                        self.pos = save;
                        let value = self.parse_literal()?;
                        app.args.push(value);
                    }
                }
                if !self.try_read(',') {
                    break;
                }
            }
            self.expect(')')?;
        }
        Ok(app)
    }

    fn parse_method(&mut self) -> ParseResult<MethodDef> {
        let mut markers = Vec::new();
        loop {
            self.skip_whitespace();
            if self.current_char() != Some('@') {
                break;
            }
            markers.push(self.parse_marker()?);
        }

        let target = if self.try_keyword("target") {
            let mut decl = TargetDecl::default();
            if self.try_read('(') {
                self.expect_keyword("priority")?;
                self.expect('=')?;
                decl.priority = self.parse_number()?;
                self.expect(')')?;
            }
            Some(decl)
        } else {
            None
        };
        let is_static = self.try_keyword("static");
        self.expect_keyword("method")?;
        let return_type = self.parse_type_ref()?;
        let name = self.read_identifier()?;
        let params = self.parse_params()?;

        let mut method = MethodDef::new(name, return_type);
        method.is_static = is_static;
        method.params = params;
        method.markers = markers;
        method.target = target;
        if !self.try_keyword("native") {
            method.body = Some(self.parse_body(&method)?);
        }
        Ok(method)
    }

    fn parse_params(&mut self) -> ParseResult<Vec<ParamDef>> {
        let mut params = Vec::new();
        self.expect('(')?;
        if self.try_read(')') {
            return Ok(params);
        }
        loop {
            let mut attrs = Vec::new();
            while self.try_read('#') {
                let attr = match self.read_identifier()? {
                    "arg" => {
                        self.expect('(')?;
                        let name = self.read_identifier()?;
                        self.expect(')')?;
                        ParamAttr::CallerArgument(name.to_string())
                    }
                    "field" => {
                        self.expect('(')?;
                        let name = self.read_identifier()?;
                        self.expect(')')?;
                        ParamAttr::CallerField(name.to_string())
                    }
                    "this" => ParamAttr::CallerInstance,
                    "caller" => ParamAttr::CallerMethodName,
                    "result" => ParamAttr::Result,
                    other => return self.error(format!("Unknown parameter attribute '#{}'", other)),
                };
                attrs.push(attr);
            }
            let is_out = self.try_keyword("out");
            let is_ref = !is_out && self.try_keyword("ref");
            let ty = self.parse_type_ref()?;
            let name = self.read_identifier()?;
            params.push(ParamDef {
                name: name.to_string(),
                ty,
                is_out,
                is_ref,
                attrs,
            });
            if !self.try_read(',') {
                break;
            }
        }
        self.expect(')')?;
        Ok(params)
    }

    fn parse_body(&mut self, method: &MethodDef) -> ParseResult<Body> {
        self.expect('{')?;
        let mut body = Body::new();
        let mut labels: HashMap<&'a str, InstId> = HashMap::new();
        let mut pending: Vec<&'a str> = Vec::new();
        let mut fixups: Vec<(InstId, &'a str, &'a str)> = Vec::new();
        let mut raw_regions: Vec<RawRegion<'a>> = Vec::new();
        let mut locals: HashMap<&'a str, LocalId> = HashMap::new();

        loop {
            self.skip_whitespace();
            if self.is_eof() {
                return self.error(format!("Unterminated body of method {}", method.name));
            }
            if self.try_read('}') {
                break;
            }
            if self.try_keyword(".try") {
                let try_start = self.read_identifier()?;
                let try_end = self.read_identifier()?;
                let kind = match self.read_word()? {
                    "catch" => RegionKind::Catch,
                    "finally" => RegionKind::Finally,
                    other => return self.error(format!("Expected 'catch' or 'finally' but found '{}'", other)),
                };
                let handler_start = self.read_identifier()?;
                let handler_end = self.read_identifier()?;
                raw_regions.push(RawRegion {
                    kind,
                    try_start,
                    try_end,
                    handler_start,
                    handler_end,
                });
                continue;
            }

            let word = self.read_word()?;
            if self.current_char() == Some(':') && !self.rest().starts_with("::") {
                self.advance();
                if labels.contains_key(word) || pending.contains(&word) {
                    return self.error(format!("Duplicate label '{}'", word));
                }
                pending.push(word);
                continue;
            }
            if word == "local" {
                let ty = self.parse_type_ref()?;
                let name = self.read_identifier()?;
                let stored = if name.starts_with('$') { None } else { Some(name.to_string()) };
                let id = match body.add_local(ty, stored) {
                    Ok(id) => id,
                    Err(e) => return self.error(e.to_string()),
                };
                locals.insert(name, id);
                continue;
            }

            let parsed = self.parse_instruction(word, method, &locals)?;
            let id = match parsed {
                Parsed::Op(op) => body.push(op),
                Parsed::Branch(mnemonic, label) => {
                    let id = body.push(Opcode::Nop);
                    fixups.push((id, mnemonic, label));
                    id
                }
            };
            for label in pending.drain(..) {
                labels.insert(label, id);
            }
        }

        if let Some(label) = pending.first() {
            return Err(ParseError::DanglingLabel {
                method: method.name.clone(),
                label: label.to_string(),
            });
        }

        let resolve = |label: &str| -> ParseResult<InstId> {
            labels
                .get(label)
                .copied()
                .ok_or_else(|| ParseError::UndefinedLabel {
                    method: method.name.clone(),
                    label: label.to_string(),
                })
        };
        let resolve_end = |label: &str| -> ParseResult<Option<InstId>> {
            if label == "end" {
                Ok(None)
            } else {
                resolve(label).map(Some)
            }
        };

        for (id, mnemonic, label) in fixups {
            let target = resolve(label)?;
            let op = match mnemonic {
                "br" => Opcode::Br(target),
                "brtrue" => Opcode::BrTrue(target),
                "brfalse" => Opcode::BrFalse(target),
                _ => Opcode::Leave(target),
            };
            // Ids come from this body, so the replacement cannot fail.
            let _ = body.replace(id, op);
        }

        for raw in raw_regions {
            let region = ExceptionRegion {
                kind: raw.kind,
                try_start: resolve(raw.try_start)?,
                try_end: resolve_end(raw.try_end)?,
                handler_start: resolve(raw.handler_start)?,
                handler_end: resolve_end(raw.handler_end)?,
            };
            if let Err(e) = body.add_region(region) {
                return self.error(e.to_string());
            }
        }
        Ok(body)
    }

    fn parse_field_ref(&mut self) -> ParseResult<FieldRef> {
        let owner = self.read_identifier()?;
        self.expect_str("::")?;
        let name = self.read_identifier()?;
        Ok(FieldRef::new(owner, name))
    }

    fn parse_method_ref(&mut self) -> ParseResult<MethodRef> {
        let owner = self.read_identifier()?;
        self.expect_str("::")?;
        let name = self.read_identifier()?;
        let mut generic_args = Vec::new();
        if self.try_read('<') {
            loop {
                generic_args.push(self.parse_type_ref()?);
                if !self.try_read(',') {
                    break;
                }
            }
            self.expect('>')?;
        }
        let mut params = Vec::new();
        self.expect('(')?;
        if !self.try_read(')') {
            loop {
                params.push(self.parse_type_ref()?);
                if !self.try_read(',') {
                    break;
                }
            }
            self.expect(')')?;
        }
        Ok(MethodRef::new(owner, name, params).with_generic_args(generic_args))
    }

    fn parse_instruction(
        &mut self,
        word: &'a str,
        method: &MethodDef,
        locals: &HashMap<&'a str, LocalId>,
    ) -> ParseResult<Parsed<'a>> {
        let op = match word {
            "nop" => Opcode::Nop,
            "ldarg" => {
                let name = self.read_word()?;
                let index = match name.parse::<u16>() {
                    Ok(i) => Some(i as usize),
                    Err(_) => method.param_index(name),
                };
                match index.filter(|&i| i < method.params.len()).map(u16::try_from) {
                    Some(Ok(i)) => Opcode::LdArg(i),
                    _ => {
                        return Err(ParseError::UnknownName {
                            method: method.name.clone(),
                            what: "parameter",
                            name: name.to_string(),
                        })
                    }
                }
            }
            "ldthis" => Opcode::LdThis,
            "ldloc" | "stloc" | "ldloca" => {
                let name = self.read_identifier()?;
                let local = match locals.get(name) {
                    Some(&l) => l,
                    None => {
                        return Err(ParseError::UnknownName {
                            method: method.name.clone(),
                            what: "local",
                            name: name.to_string(),
                        })
                    }
                };
                match word {
                    "ldloc" => Opcode::LdLoc(local),
                    "stloc" => Opcode::StLoc(local),
                    _ => Opcode::LdLocA(local),
                }
            }
            "ldind" => Opcode::LdInd,
            "stind" => Opcode::StInd,
            "ldc.i4" => Opcode::Const(Literal::Int(self.parse_number()?)),
            "ldc.i8" => Opcode::Const(Literal::Long(self.parse_number()?)),
            "ldc.u8" => Opcode::Const(Literal::ULong(self.parse_number()?)),
            "ldc.r4" => Opcode::Const(Literal::Float(self.parse_number()?)),
            "ldc.r8" => Opcode::Const(Literal::Double(self.parse_number()?)),
            "ldstr" => {
                self.skip_whitespace();
                Opcode::Const(Literal::Str(self.read_string()?))
            }
            "ldc.bool" => match self.read_word()? {
                "true" => Opcode::Const(Literal::Bool(true)),
                "false" => Opcode::Const(Literal::Bool(false)),
                other => return self.error(format!("Expected a boolean but found '{}'", other)),
            },
            "ldnull" => Opcode::LdNull,
            "lddefault" => Opcode::LdDefault(self.parse_type_ref()?),
            "ldfld" => Opcode::LdFld(self.parse_field_ref()?),
            "stfld" => Opcode::StFld(self.parse_field_ref()?),
            "ldsfld" => Opcode::LdSFld(self.parse_field_ref()?),
            "stsfld" => Opcode::StSFld(self.parse_field_ref()?),
            "ldflda" => Opcode::LdFldA(self.parse_field_ref()?),
            "ldsflda" => Opcode::LdSFldA(self.parse_field_ref()?),
            "newobj" => Opcode::NewObj(self.parse_type_ref()?),
            "add" => Opcode::Add,
            "sub" => Opcode::Sub,
            "mul" => Opcode::Mul,
            "div" => Opcode::Div,
            "rem" => Opcode::Rem,
            "ceq" => Opcode::Ceq,
            "cgt" => Opcode::Cgt,
            "clt" => Opcode::Clt,
            "br" | "brtrue" | "brfalse" | "leave" => {
                let label = self.read_identifier()?;
                return Ok(Parsed::Branch(word, label));
            }
            "endfinally" => Opcode::EndFinally,
            "throw" => Opcode::Throw,
            "ret" => Opcode::Ret,
            "pop" => Opcode::Pop,
            "dup" => Opcode::Dup,
            "call" => Opcode::Call(self.parse_method_ref()?),
            "callvirt" => Opcode::CallVirt(self.parse_method_ref()?),
            other => return self.error(format!("Unknown instruction '{}'", other)),
        };
        Ok(Parsed::Op(op))
    }
}
